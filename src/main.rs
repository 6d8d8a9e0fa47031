use anyhow::Result;
use std::env;

#[cfg(windows)]
use anyhow::Context;

fn print_instructions() {
    println!("QuickBooks Query Service");
    println!("========================");
    println!();
    println!("Queries customers and invoices from QuickBooks Desktop over qbXML and");
    println!("prints the results as JSON. Configuration is read from config/config.toml.");
    println!();
    println!("Prerequisites:");
    println!("   1. QuickBooks Desktop and the QuickBooks SDK must be installed");
    println!("   2. A company file must be open in QuickBooks (or set company_file)");
    println!();
    println!("Usage: qb_query [--verbose] [customers] [invoices]");
    println!("With no entity arguments, both customers and invoices are queried.");
    println!();
}

#[tokio::main]
async fn main() {
    match real_main().await {
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

async fn real_main() -> Result<()> {
    // Parse arguments
    let args: Vec<String> = env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    let entities: Vec<String> = args
        .iter()
        .skip(1)
        .filter(|a| !a.starts_with('-'))
        .cloned()
        .collect();

    if verbose {
        env_logger::builder().filter_level(log::LevelFilter::Debug).init();
    } else {
        env_logger::builder().filter_level(log::LevelFilter::Info).init();
    }

    print_instructions();

    run_queries(entities).await
}

#[cfg(not(windows))]
async fn run_queries(_entities: Vec<String>) -> Result<()> {
    anyhow::bail!("QuickBooks COM automation is only available on Windows")
}

#[cfg(windows)]
async fn run_queries(entities: Vec<String>) -> Result<()> {
    use log::info;
    use qbxml_query_service::client::QuickBooksClient;
    use qbxml_query_service::config::Config;
    use qbxml_query_service::queries::{CustomerQuery, InvoiceQuery};
    use qbxml_query_service::request_processor::ComProcessorFactory;
    use std::sync::Arc;
    use std::time::Duration;

    let entities = if entities.is_empty() {
        vec!["customers".to_string(), "invoices".to_string()]
    } else {
        entities
    };
    for entity in &entities {
        if entity != "customers" && entity != "invoices" {
            anyhow::bail!("Unknown entity '{}': expected customers or invoices", entity);
        }
    }

    info!("Loading configuration from config/config.toml...");
    let config = Config::load_from_file("config/config.toml")
        .context("Failed to load configuration file")?;

    unsafe {
        windows::Win32::System::Com::CoInitializeEx(
            None,
            windows::Win32::System::Com::COINIT_APARTMENTTHREADED,
        )
        .ok()
        .context("Failed to initialize COM")?;
    }

    let timeout = Duration::from_secs(config.quickbooks.request_timeout_secs.unwrap_or(30));
    let mut client = QuickBooksClient::from_config(&config, Arc::new(ComProcessorFactory))?;

    // Every call into QuickBooks blocks and offers no cancellation, so the
    // whole run goes onto a worker thread under a watchdog. On timeout the
    // client (and with it the connection) is abandoned, not reused.
    let worker = tokio::task::spawn_blocking(move || {
        let mut output = serde_json::Map::new();
        for entity in entities {
            match entity.as_str() {
                "customers" => {
                    info!("Querying customers...");
                    let customers = client.get_customers(CustomerQuery::new())?;
                    info!("Received {} customer(s)", customers.len());
                    output.insert("customers".to_string(), serde_json::to_value(customers)?);
                }
                "invoices" => {
                    info!("Querying invoices...");
                    let invoices = client.get_invoices(InvoiceQuery::new())?;
                    info!("Received {} invoice(s)", invoices.len());
                    output.insert("invoices".to_string(), serde_json::to_value(invoices)?);
                }
                _ => unreachable!("entities validated above"),
            }
        }
        client.disconnect();
        anyhow::Ok(output)
    });

    let output = match tokio::time::timeout(timeout, worker).await {
        Err(_) => anyhow::bail!(
            "QuickBooks did not respond within {}s; discarding the connection",
            timeout.as_secs()
        ),
        Ok(joined) => joined.context("query worker panicked")??,
    };

    println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(output))?);

    unsafe {
        windows::Win32::System::Com::CoUninitialize();
    }

    Ok(())
}
