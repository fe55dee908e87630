//! Reference eSCL-style protocol handler.
//!
//! Implements one concrete wire format: capabilities are fetched with GET,
//! a scan job is created with POST (the scanner's job location comes back
//! as an HTTP `Location` header), pages are pulled with GET
//! .../NextDocument, and job completion is tracked by polling
//! .../ScannerStatus between pages — the SCAN→LOAD*→CHECK/CLEANUP ladder.
//! XML bodies use a minimal, unprefixed profile rather than full eSCL
//! namespacing, since this handler exists to exercise the adapter
//! contract, not to be a compliant eSCL client.

use std::time::Duration;

use serde::Deserialize;

use crate::error::Status;
use crate::geometry::AxisLimits;
use super::{
    Capabilities, Handler, HttpMethod, HttpResponse, NextOp, ProtoData, ProtoOp, ProtoResult,
    Query, QueryCtx,
};

/// eSCL's native pixel grid is always 300 dpi.
const ESCL_UNITS_DPI: u32 = 300;

pub struct EsclHandler;

impl EsclHandler {
    pub fn new() -> Self {
        EsclHandler
    }
}

impl Default for EsclHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct CapabilitiesDoc {
    #[serde(rename = "Manufacturer", default)]
    manufacturer: Option<String>,
    #[serde(rename = "Model", default)]
    model: Option<String>,
    #[serde(rename = "Platen")]
    platen: PlatenDoc,
}

#[derive(Debug, Deserialize)]
struct PlatenDoc {
    #[serde(rename = "PlatenInputCaps")]
    input_caps: InputCapsDoc,
}

#[derive(Debug, Deserialize)]
struct InputCapsDoc {
    #[serde(rename = "MinWidth")]
    min_width: i64,
    #[serde(rename = "MaxWidth")]
    max_width: i64,
    #[serde(rename = "MinHeight")]
    min_height: i64,
    #[serde(rename = "MaxHeight")]
    max_height: i64,
}

#[derive(Debug, Deserialize)]
struct StatusDoc {
    #[serde(rename = "JobState")]
    job_state: String,
}

impl Handler for EsclHandler {
    fn name(&self) -> &'static str {
        "eSCL"
    }

    fn query(&self, op: ProtoOp, ctx: &QueryCtx) -> Query {
        match op {
            ProtoOp::Capabilities => Query {
                method: HttpMethod::Get,
                uri: format!("{}/ScannerCapabilities", ctx.base_uri),
                body: None,
                content_type: None,
            },
            ProtoOp::Scan => {
                let p = ctx.scan_params.expect("scan params required for SCAN");
                let body = format!(
                    "<ScanSettings>\
                       <XOffset>{}</XOffset><YOffset>{}</YOffset>\
                       <Width>{}</Width><Height>{}</Height>\
                       <XResolution>{}</XResolution><YResolution>{}</YResolution>\
                       <InputSource>{}</InputSource><ColorMode>{}</ColorMode>\
                     </ScanSettings>",
                    p.x_off, p.y_off, p.width, p.height, p.x_res, p.y_res, p.source, p.color_mode,
                );
                Query {
                    method: HttpMethod::Post,
                    uri: format!("{}/ScanJobs", ctx.base_uri),
                    body: Some(body.into_bytes()),
                    content_type: Some("text/xml".to_string()),
                }
            }
            ProtoOp::Load => {
                let loc = ctx.job_location.expect("job location required for LOAD");
                Query { method: HttpMethod::Get, uri: format!("{loc}/NextDocument"), body: None, content_type: None }
            }
            ProtoOp::Status => {
                let loc = ctx.job_location.expect("job location required for STATUS");
                Query { method: HttpMethod::Get, uri: format!("{loc}/ScannerStatus"), body: None, content_type: None }
            }
            ProtoOp::Cancel | ProtoOp::Cleanup => {
                let loc = ctx.job_location.expect("job location required for CANCEL/CLEANUP");
                Query { method: HttpMethod::Delete, uri: loc.to_string(), body: None, content_type: None }
            }
        }
    }

    fn decode_capabilities(&self, response: &HttpResponse) -> anyhow::Result<Capabilities> {
        let text = std::str::from_utf8(&response.body)?;
        let doc: CapabilitiesDoc = quick_xml::de::from_str(text)?;
        let caps = doc.platen.input_caps;
        Ok(Capabilities {
            x_limits: AxisLimits { min_len: caps.min_width, max_len: caps.max_width, units_dpi: ESCL_UNITS_DPI },
            y_limits: AxisLimits { min_len: caps.min_height, max_len: caps.max_height, units_dpi: ESCL_UNITS_DPI },
            default_x_res: ESCL_UNITS_DPI,
            default_y_res: ESCL_UNITS_DPI,
            sources: vec!["Platen".to_string()],
            color_modes: vec!["Color".to_string(), "Grayscale".to_string()],
            vendor: doc.manufacturer,
            model: doc.model,
        })
    }

    fn decode(&self, op: ProtoOp, response: &HttpResponse) -> ProtoResult {
        match op {
            ProtoOp::Scan => decode_scan(response),
            ProtoOp::Load => decode_load(response),
            ProtoOp::Status => decode_status(response),
            ProtoOp::Capabilities | ProtoOp::Cancel | ProtoOp::Cleanup => {
                unreachable!("adapter does not route {op:?} through Handler::decode")
            }
        }
    }
}

fn decode_scan(response: &HttpResponse) -> ProtoResult {
    if response.status == 201 || response.status == 200 {
        match &response.location {
            Some(location) => ProtoResult {
                next: NextOp::Load,
                delay: Duration::ZERO,
                status: Status::Good,
                data: ProtoData { location: Some(location.clone()), image: None },
                error: None,
            },
            None => ProtoResult::finish(Status::IoError),
        }
    } else if response.status == 503 {
        // Scanner busy with another job; retry shortly.
        ProtoResult {
            next: NextOp::Load,
            delay: Duration::from_secs(1),
            status: Status::Good,
            data: ProtoData::default(),
            error: Some("device busy".to_string()),
        }
    } else {
        ProtoResult::finish(status_for_error(response.status))
    }
}

fn decode_load(response: &HttpResponse) -> ProtoResult {
    match response.status {
        200 => ProtoResult {
            next: NextOp::Status,
            delay: Duration::ZERO,
            status: Status::Good,
            data: ProtoData { location: None, image: Some(response.body.clone()) },
            error: None,
        },
        404 | 409 => ProtoResult {
            next: NextOp::Cleanup,
            delay: Duration::ZERO,
            status: Status::Good,
            data: ProtoData::default(),
            error: None,
        },
        other => ProtoResult::finish(status_for_error(other)),
    }
}

/// Map an HTTP status the wire format doesn't give special handling to onto
/// the closest `Status` kind a SANE-style caller can act on.
fn status_for_error(http_status: u16) -> Status {
    match http_status {
        401 | 403 => Status::AccessDenied,
        501 => Status::Unsupported,
        _ => Status::IoError,
    }
}

fn decode_status(response: &HttpResponse) -> ProtoResult {
    let text = match std::str::from_utf8(&response.body) {
        Ok(t) => t,
        Err(_) => return ProtoResult::finish(Status::IoError),
    };
    let doc: StatusDoc = match quick_xml::de::from_str(text) {
        Ok(d) => d,
        Err(_) => return ProtoResult::finish(Status::IoError),
    };
    match doc.job_state.as_str() {
        "Processing" => ProtoResult {
            next: NextOp::Load,
            delay: Duration::ZERO,
            status: Status::Good,
            data: ProtoData::default(),
            error: None,
        },
        "Completed" => ProtoResult {
            next: NextOp::Cleanup,
            delay: Duration::ZERO,
            status: Status::Good,
            data: ProtoData::default(),
            error: None,
        },
        other => ProtoResult {
            next: NextOp::Cleanup,
            delay: Duration::ZERO,
            status: Status::IoError,
            data: ProtoData::default(),
            error: Some(format!("job entered state {other}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16, body: &str) -> HttpResponse {
        HttpResponse { status, body: body.as_bytes().to_vec(), content_type: Some("text/xml".into()), location: None }
    }

    #[test]
    fn decodes_capabilities() {
        let body = "<ScannerCapabilities><Manufacturer>Acme</Manufacturer><Model>X1</Model>\
                     <Platen><PlatenInputCaps><MinWidth>600</MinWidth><MaxWidth>2550</MaxWidth>\
                     <MinHeight>600</MinHeight><MaxHeight>3508</MaxHeight></PlatenInputCaps></Platen>\
                     </ScannerCapabilities>";
        let handler = EsclHandler::new();
        let caps = handler.decode_capabilities(&resp(200, body)).unwrap();
        assert_eq!(caps.x_limits.min_len, 600);
        assert_eq!(caps.x_limits.max_len, 2550);
        assert_eq!(caps.vendor.as_deref(), Some("Acme"));
    }

    #[test]
    fn load_404_moves_to_cleanup() {
        let r = decode_load(&resp(404, ""));
        assert_eq!(r.next, NextOp::Cleanup);
        assert_eq!(r.status, Status::Good);
    }

    #[test]
    fn status_processing_continues_loading() {
        let r = decode_status(&resp(200, "<ScannerStatus><JobState>Processing</JobState></ScannerStatus>"));
        assert_eq!(r.next, NextOp::Load);
    }

    #[test]
    fn status_aborted_is_io_error() {
        let r = decode_status(&resp(200, "<ScannerStatus><JobState>Aborted</JobState></ScannerStatus>"));
        assert_eq!(r.status, Status::IoError);
        assert_eq!(r.next, NextOp::Cleanup);
    }

    #[test]
    fn scan_forbidden_is_access_denied() {
        let r = decode_scan(&resp(403, ""));
        assert_eq!(r.status, Status::AccessDenied);
    }

    #[test]
    fn load_not_implemented_is_unsupported() {
        let r = decode_load(&resp(501, ""));
        assert_eq!(r.status, Status::Unsupported);
    }
}
