// COM wrapper for QBXMLRP2.RequestProcessor, the qbXML automation interface
// QuickBooks Desktop registers on Windows. Method dispids are looked up once
// at creation and cached.

use std::ptr;
use std::sync::Arc;

use windows::core::{IUnknown, HSTRING, PCWSTR};
use windows::Win32::System::Com::{
    CLSIDFromProgID, CoCreateInstance, IDispatch, CLSCTX_LOCAL_SERVER, DISPATCH_METHOD,
    DISPPARAMS,
};
use windows::Win32::System::Variant::{
    VariantChangeType, VAR_CHANGE_FLAGS, VARIANT, VT_BSTR,
};
use windows::core::BSTR;

use crate::error::{QbError, Result};
use crate::processor::{ConnectionSettings, ProcessorFactory, RequestProcessor};
use crate::FileMode;

const PROG_ID: &str = "QBXMLRP2.RequestProcessor.2";
const LOCALE_US: u32 = 0x0409;

pub struct ComRequestProcessor {
    inner: IDispatch,
    // Cached method IDs, resolved once at creation
    open_connection_id: i32,
    begin_session_id: i32,
    end_session_id: i32,
    close_connection_id: i32,
    process_request_id: i32,
}

// The processor is only ever driven from one request at a time; COM is
// initialized apartment-threaded by the binary before any instance exists.
unsafe impl Send for ComRequestProcessor {}
unsafe impl Sync for ComRequestProcessor {}

impl ComRequestProcessor {
    pub fn new() -> Result<Self> {
        let prog_id = HSTRING::from(PROG_ID);
        let clsid = unsafe { CLSIDFromProgID(&prog_id) }.map_err(|e| {
            QbError::Connection(format!(
                "QuickBooks SDK not registered ({}): {}",
                PROG_ID, e
            ))
        })?;
        let dispatch: IDispatch = unsafe {
            CoCreateInstance::<Option<&IUnknown>, IDispatch>(&clsid, None, CLSCTX_LOCAL_SERVER)
        }
        .map_err(|e| QbError::Connection(format!("failed to create {}: {}", PROG_ID, e)))?;

        let open_connection_id = Self::method_id(&dispatch, "OpenConnection")?;
        let begin_session_id = Self::method_id(&dispatch, "BeginSession")?;
        let end_session_id = Self::method_id(&dispatch, "EndSession")?;
        let close_connection_id = Self::method_id(&dispatch, "CloseConnection")?;
        let process_request_id = Self::method_id(&dispatch, "ProcessRequest")?;

        Ok(Self {
            inner: dispatch,
            open_connection_id,
            begin_session_id,
            end_session_id,
            close_connection_id,
            process_request_id,
        })
    }

    fn method_id(dispatch: &IDispatch, name: &str) -> Result<i32> {
        let mut dispid = -1i32;
        let method_name = HSTRING::from(name);
        let names = [PCWSTR::from_raw(method_name.as_ptr())];

        unsafe {
            dispatch.GetIDsOfNames(
                &windows::core::GUID::zeroed(),
                names.as_ptr(),
                1,
                LOCALE_US,
                &mut dispid,
            )
        }
        .map_err(|e| QbError::Connection(format!("no dispid for {}: {}", name, e)))?;
        Ok(dispid)
    }

    fn invoke(&self, dispid: i32, args: &[VARIANT], want_result: bool) -> Result<Option<VARIANT>> {
        // rgvarg is in reverse parameter order per the IDispatch contract
        let mut params = DISPPARAMS {
            rgvarg: if args.is_empty() {
                ptr::null_mut()
            } else {
                args.as_ptr() as *mut _
            },
            rgdispidNamedArgs: ptr::null_mut(),
            cArgs: args.len() as u32,
            cNamedArgs: 0,
        };
        let mut result = VARIANT::default();

        unsafe {
            self.inner.Invoke(
                dispid,
                &windows::core::GUID::zeroed(),
                LOCALE_US,
                DISPATCH_METHOD,
                &mut params,
                want_result.then_some(&mut result as *mut _),
                None,
                None,
            )
        }
        .map_err(|e| QbError::Connection(format!("COM invoke failed: {}", e)))?;

        Ok(want_result.then_some(result))
    }

    pub fn open_connection(&self, app_id: &str, app_name: &str) -> Result<()> {
        // reverse order: last parameter first
        let args = [bstr_variant(app_name), bstr_variant(app_id)];
        self.invoke(self.open_connection_id, &args, false)?;
        log::debug!("connection opened as '{}'", app_name);
        Ok(())
    }
}

impl RequestProcessor for ComRequestProcessor {
    fn begin_session(&self, company_file: &str, file_mode: FileMode) -> Result<String> {
        let mode = match file_mode {
            FileMode::DoNotCare => "qbFileOpenDoNotCare",
            FileMode::SingleUser => "qbFileOpenSingleUser",
            FileMode::MultiUser => "qbFileOpenMultiUser",
            FileMode::Online => "qbFileOpenOnline",
        };
        let args = [bstr_variant(mode), bstr_variant(company_file)];
        let result = self.invoke(self.begin_session_id, &args, true)?;
        match result {
            Some(variant) => variant_to_string(&variant)
                .map_err(|e| QbError::Session(format!("BeginSession returned no ticket: {}", e))),
            None => Err(QbError::Session("BeginSession returned no ticket".to_string())),
        }
    }

    fn end_session(&self, ticket: &str) -> Result<()> {
        let args = [bstr_variant(ticket)];
        self.invoke(self.end_session_id, &args, false)
            .map_err(|e| QbError::Session(format!("EndSession failed: {}", e)))?;
        Ok(())
    }

    fn process_request(&self, ticket: &str, request_xml: &str) -> Result<String> {
        let args = [bstr_variant(request_xml), bstr_variant(ticket)];
        let result = self.invoke(self.process_request_id, &args, true)?;
        match result {
            Some(variant) => variant_to_string(&variant)
                .map_err(|e| QbError::Protocol(format!("ProcessRequest returned no document: {}", e))),
            None => Err(QbError::Protocol("ProcessRequest returned no document".to_string())),
        }
    }

    fn close_connection(&self) -> Result<()> {
        self.invoke(self.close_connection_id, &[], false)?;
        Ok(())
    }
}

fn bstr_variant(s: &str) -> VARIANT {
    unsafe {
        let mut variant = VARIANT::default();
        let bstr = BSTR::from(s);
        (*variant.Anonymous.Anonymous).vt = VT_BSTR;
        let slot = &mut (*variant.Anonymous.Anonymous).Anonymous as *mut _ as *mut BSTR;
        *slot = bstr;
        variant
    }
}

fn variant_to_string(variant: &VARIANT) -> windows::core::Result<String> {
    unsafe {
        if variant.Anonymous.Anonymous.vt == VT_BSTR {
            let bstr = &variant.Anonymous.Anonymous.Anonymous.bstrVal;
            return Ok(bstr.to_string());
        }

        let mut dest = VARIANT::default();
        VariantChangeType(&mut dest, variant, VAR_CHANGE_FLAGS(0), VT_BSTR)?;
        let bstr = &dest.Anonymous.Anonymous.Anonymous.bstrVal;
        Ok(bstr.to_string())
    }
}

/// Opens a fresh COM request processor and its QuickBooks connection.
pub struct ComProcessorFactory;

impl ProcessorFactory for ComProcessorFactory {
    fn open(&self, settings: &ConnectionSettings) -> Result<Arc<dyn RequestProcessor>> {
        let processor = ComRequestProcessor::new()?;
        processor.open_connection(&settings.app_id, &settings.app_name)?;
        Ok(Arc::new(processor))
    }
}
