//! Request dispatch.
//!
//! Turns a raw framed message into exactly one [`Response`]. Requests are
//! validated into a typed [`Command`] first; only requests that reach a
//! handler are timed, so the statistics reflect command execution rather
//! than garbage input. Every failure becomes an error response, never a
//! dropped connection.

use crate::backend::Instrumentation;
use crate::scan::{ScanState, ScanValue};
use crate::session::{SessionId, SessionManager};
use crate::timing::TimingCollector;
use freat_common::{
    AttachTarget, CommandKind, Error, Response, Result, ScanType, ValueWidth,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const DEFAULT_WIDTH: u64 = 4;
const DEFAULT_PAGE: u64 = 1;
const DEFAULT_PAGE_SIZE: u64 = 100;
const DEFAULT_MAX_LENGTH: u64 = 256;

/// A fully validated request
#[derive(Debug)]
enum Command {
    Attach {
        target: AttachTarget,
    },
    Detach,
    ScanMemory {
        value: ScanValue,
        width: ValueWidth,
        signed: bool,
        scan_type: ScanType,
    },
    ReadMemory {
        address: usize,
        mode: ReadMode,
    },
    WriteMemory {
        address: usize,
        value: i64,
        width: ValueWidth,
    },
    GetMemoryMaps,
    GetScanResults {
        page: usize,
        page_size: usize,
    },
    GetProcesses,
    GetTimingStats,
}

#[derive(Debug)]
enum ReadMode {
    Number { width: ValueWidth, signed: bool },
    Text { max_length: usize },
}

pub struct Dispatcher {
    sessions: SessionManager,
    timing: TimingCollector,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Instrumentation>) -> Self {
        Self {
            sessions: SessionManager::new(backend),
            timing: TimingCollector::new(),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn timing(&self) -> &TimingCollector {
        &self.timing
    }

    pub fn open_session(&self) -> SessionId {
        self.sessions.open()
    }

    pub fn close_session(&self, session: SessionId) {
        self.sessions.close(session);
    }

    /// Dispatch one raw message payload. Undecodable payloads produce an
    /// error response with a null command echo.
    pub fn dispatch_raw(&self, session: SessionId, payload: &[u8]) -> Response {
        match serde_json::from_slice::<Value>(payload) {
            Ok(request) => self.dispatch(session, &request),
            Err(_) => Response::failure(None, &Error::MalformedRequest),
        }
    }

    /// Dispatch one decoded request object
    pub fn dispatch(&self, session: SessionId, request: &Value) -> Response {
        let name = match request.get("command") {
            None | Some(Value::Null) => {
                return Response::failure(None, &Error::MissingField("command"));
            }
            Some(Value::String(name)) => name.as_str(),
            Some(_) => return Response::failure(None, &Error::InvalidField("command")),
        };

        let Some(kind) = CommandKind::parse(name) else {
            return Response::failure(
                Some(name),
                &Error::UnknownCommand(name.to_string()),
            );
        };
        debug!(target: "freat_core::dispatch", session = %session, command = name, "Dispatching");

        let command = match parse_command(kind, request) {
            Ok(command) => command,
            Err(e) => return Response::failure(Some(name), &e),
        };

        let start = Instant::now();
        let outcome = self.execute(session, kind, command);
        self.timing.record(kind.as_str(), start.elapsed());

        match outcome {
            Ok(response) => response,
            Err(e) => Response::failure(Some(name), &e),
        }
    }

    fn execute(&self, session: SessionId, kind: CommandKind, command: Command) -> Result<Response> {
        match command {
            Command::Attach { target } => {
                let pid = self.sessions.attach(session, &target)?;
                Ok(Response::message(kind, format!("Attached to process {pid}")))
            }
            Command::Detach => {
                self.sessions.detach(session)?;
                Ok(Response::message(kind, "Detached from process"))
            }
            Command::ScanMemory {
                value,
                width,
                signed,
                scan_type,
            } => {
                let count = self.sessions.with_attachment(session, |att| {
                    match (&value, scan_type) {
                        // A string value always starts a fresh literal scan
                        (ScanValue::Text(needle), _) => {
                            let state = ScanState::first_text(att.handle.as_ref(), needle)?;
                            let count = state.len();
                            att.scan = Some(state);
                            Ok(count)
                        }
                        (ScanValue::Number(n), ScanType::First) => {
                            let state =
                                ScanState::first_numeric(att.handle.as_ref(), *n, width, signed)?;
                            let count = state.len();
                            att.scan = Some(state);
                            Ok(count)
                        }
                        (ScanValue::Number(_), ScanType::Next) => {
                            let state = att.scan.as_mut().ok_or(Error::NoActiveScan)?;
                            state.narrow(att.handle.as_ref(), &value)
                        }
                    }
                })?;
                Ok(Response::result(kind, json!(count)))
            }
            Command::ReadMemory { address, mode } => {
                let value = self.sessions.with_attachment(session, |att| match mode {
                    ReadMode::Number { width, signed } => {
                        let bytes = att.handle.read(address, width.size())?;
                        if bytes.len() < width.size() {
                            return Err(Error::backend(format!(
                                "short read at 0x{address:x}"
                            )));
                        }
                        Ok(width.decode(&bytes, signed))
                    }
                    ReadMode::Text { max_length } => {
                        let bytes = att.handle.read(address, max_length)?;
                        // Stop at the first NUL like a C string
                        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                        Ok(json!(String::from_utf8_lossy(&bytes[..end]).into_owned()))
                    }
                })?;
                Ok(Response::result(kind, value))
            }
            Command::WriteMemory {
                address,
                value,
                width,
            } => {
                self.sessions.with_attachment(session, |att| {
                    att.handle.write(address, &width.encode(value))
                })?;
                Ok(Response::message(kind, "Memory written successfully"))
            }
            Command::GetMemoryMaps => {
                let maps = self
                    .sessions
                    .with_attachment(session, |att| att.handle.memory_maps())?;
                Ok(Response::result(kind, serde_json::to_value(maps)?))
            }
            Command::GetScanResults { page, page_size } => {
                let results = self.sessions.with_attachment(session, |att| {
                    let state = att.scan.as_ref().ok_or(Error::NoActiveScan)?;
                    state.page(att.handle.as_ref(), page, page_size)
                })?;
                Ok(Response::result(kind, serde_json::to_value(results)?))
            }
            Command::GetProcesses => {
                let processes = self.sessions.backend().processes()?;
                Ok(Response::result(kind, serde_json::to_value(processes)?))
            }
            Command::GetTimingStats => {
                let stats = self.timing.snapshot();
                Ok(Response::result(kind, serde_json::to_value(stats)?))
            }
        }
    }
}

fn parse_command(kind: CommandKind, request: &Value) -> Result<Command> {
    match kind {
        CommandKind::Attach => {
            let target = AttachTarget::from_value(required(request, "target")?)?;
            Ok(Command::Attach { target })
        }
        CommandKind::Detach => Ok(Command::Detach),
        CommandKind::ScanMemory => Ok(Command::ScanMemory {
            value: parse_scan_value(required(request, "value")?)?,
            width: parse_width(request)?,
            signed: opt_bool(request, "signed", false)?,
            scan_type: match request.get("scan_type") {
                None | Some(Value::Null) => ScanType::First,
                Some(Value::String(s)) => ScanType::parse(s)?,
                Some(other) => return Err(Error::InvalidScanType(other.to_string())),
            },
        }),
        CommandKind::ReadMemory => {
            let address = parse_address(required(request, "address")?)?;
            let mode = if opt_bool(request, "is_string", false)? {
                ReadMode::Text {
                    max_length: opt_u64(request, "max_length", DEFAULT_MAX_LENGTH)? as usize,
                }
            } else {
                ReadMode::Number {
                    width: parse_width(request)?,
                    signed: opt_bool(request, "signed", false)?,
                }
            };
            Ok(Command::ReadMemory { address, mode })
        }
        CommandKind::WriteMemory => {
            // signed is accepted for symmetry; two's complement encoding
            // does not depend on it
            let _ = opt_bool(request, "signed", false)?;
            Ok(Command::WriteMemory {
                address: parse_address(required(request, "address")?)?,
                value: required(request, "value")?
                    .as_i64()
                    .ok_or(Error::InvalidField("value"))?,
                width: parse_width(request)?,
            })
        }
        CommandKind::GetMemoryMaps => Ok(Command::GetMemoryMaps),
        CommandKind::GetScanResults => {
            let page_size = opt_u64(request, "page_size", DEFAULT_PAGE_SIZE)? as usize;
            if page_size == 0 {
                return Err(Error::InvalidField("page_size"));
            }
            Ok(Command::GetScanResults {
                page: opt_u64(request, "page", DEFAULT_PAGE)? as usize,
                page_size,
            })
        }
        CommandKind::GetProcesses => Ok(Command::GetProcesses),
        CommandKind::GetTimingStats => Ok(Command::GetTimingStats),
    }
}

fn required<'a>(request: &'a Value, field: &'static str) -> Result<&'a Value> {
    match request.get(field) {
        None | Some(Value::Null) => Err(Error::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn opt_u64(request: &Value, field: &'static str, default: u64) -> Result<u64> {
    match request.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or(Error::InvalidField(field)),
    }
}

fn opt_bool(request: &Value, field: &'static str, default: bool) -> Result<bool> {
    match request.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_bool().ok_or(Error::InvalidField(field)),
    }
}

fn parse_width(request: &Value) -> Result<ValueWidth> {
    ValueWidth::from_u64(opt_u64(request, "width", DEFAULT_WIDTH)?)
}

/// Scan values are integers or literal strings; floats are rejected
fn parse_scan_value(value: &Value) -> Result<ScanValue> {
    if let Some(n) = value.as_i64() {
        return Ok(ScanValue::Number(n));
    }
    if let Some(s) = value.as_str() {
        return Ok(ScanValue::Text(s.to_string()));
    }
    Err(Error::InvalidField("value"))
}

/// Addresses arrive as JSON integers, decimal strings or `0x`-prefixed hex
fn parse_address(value: &Value) -> Result<usize> {
    if let Some(n) = value.as_u64() {
        return Ok(n as usize);
    }
    if let Some(s) = value.as_str() {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => usize::from_str_radix(hex, 16),
            None => s.parse(),
        };
        if let Ok(address) = parsed {
            return Ok(address);
        }
    }
    Err(Error::InvalidField("address"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockProcess};

    fn dispatcher_with(process: MockProcess) -> (Dispatcher, SessionId, Arc<MockProcess>) {
        let (backend, process) = MockBackend::single(process);
        let dispatcher = Dispatcher::new(Arc::new(backend));
        let session = dispatcher.open_session();
        (dispatcher, session, process)
    }

    fn counters_process() -> MockProcess {
        let data: Vec<u8> = [100u32, 7, 100, 100, 9]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        MockProcess::new(42, "demo").with_region(0x1000, data)
    }

    #[test]
    fn test_malformed_payload() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        let response = dispatcher.dispatch_raw(session, b"{not json");
        assert!(!response.is_success());
        assert_eq!(response.error.as_deref(), Some("Invalid JSON format"));
        assert_eq!(response.command, None);
    }

    #[test]
    fn test_missing_command_field() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        let response = dispatcher.dispatch(session, &json!({"value": 1}));
        assert_eq!(response.error.as_deref(), Some("Missing 'command' field"));
    }

    #[test]
    fn test_unknown_command() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        let response = dispatcher.dispatch(session, &json!({"command": "frobnicate"}));
        assert_eq!(
            response.error.as_deref(),
            Some("Unknown command: frobnicate")
        );
        assert_eq!(response.command.as_deref(), Some("frobnicate"));
    }

    #[test]
    fn test_attach_and_detach_messages() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());

        let response =
            dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        assert!(response.is_success());
        assert_eq!(response.message.as_deref(), Some("Attached to process 42"));

        let response = dispatcher.dispatch(session, &json!({"command": "detach"}));
        assert_eq!(response.message.as_deref(), Some("Detached from process"));
    }

    #[test]
    fn test_attach_by_name() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        let response =
            dispatcher.dispatch(session, &json!({"command": "attach", "target": "demo"}));
        assert_eq!(response.message.as_deref(), Some("Attached to process 42"));
    }

    #[test]
    fn test_attach_unknown_process() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        let response =
            dispatcher.dispatch(session, &json!({"command": "attach", "target": 9999}));
        assert_eq!(response.error.as_deref(), Some("Process not found: 9999"));
    }

    #[test]
    fn test_commands_require_attachment() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        for request in [
            json!({"command": "scan_memory", "value": 100}),
            json!({"command": "read_memory", "address": 0x1000}),
            json!({"command": "write_memory", "address": 0x1000, "value": 1}),
            json!({"command": "get_memory_maps"}),
            json!({"command": "get_scan_results"}),
            json!({"command": "detach"}),
        ] {
            let response = dispatcher.dispatch(session, &request);
            assert_eq!(
                response.error.as_deref(),
                Some("Not attached to any process"),
                "request: {request}"
            );
        }
    }

    #[test]
    fn test_scan_narrow_retrieve_flow() {
        let (dispatcher, session, process) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));

        let response =
            dispatcher.dispatch(session, &json!({"command": "scan_memory", "value": 100}));
        assert_eq!(response.result, Some(json!(3)));

        // One of the three candidates changes, narrow to it
        process.poke(0x1008, &55u32.to_le_bytes());
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "scan_memory", "value": 55, "scan_type": "next"}),
        );
        assert_eq!(response.result, Some(json!(1)));

        let response = dispatcher.dispatch(
            session,
            &json!({"command": "get_scan_results", "page": 1, "page_size": 10}),
        );
        let result = response.result.unwrap();
        assert_eq!(result["total"], 1);
        assert_eq!(result["results"][0]["address"], "0x1008");
        assert_eq!(result["results"][0]["value"], 55);
    }

    #[test]
    fn test_next_scan_without_first() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "scan_memory", "value": 1, "scan_type": "next"}),
        );
        assert_eq!(
            response.error.as_deref(),
            Some("No active scan. Run a first scan before a next scan")
        );
    }

    #[test]
    fn test_results_without_scan() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        let response = dispatcher.dispatch(session, &json!({"command": "get_scan_results"}));
        assert!(response.error.as_deref().unwrap().starts_with("No active scan"));
    }

    #[test]
    fn test_invalid_scan_type() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "scan_memory", "value": 1, "scan_type": "middle"}),
        );
        assert_eq!(
            response.error.as_deref(),
            Some("Invalid scan_type: middle. Must be 'first' or 'next'")
        );
    }

    #[test]
    fn test_unsupported_width() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "scan_memory", "value": 1, "width": 3}),
        );
        assert_eq!(response.error.as_deref(), Some("Unsupported width: 3"));
    }

    #[test]
    fn test_float_scan_value_rejected() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "scan_memory", "value": 1.5}),
        );
        assert_eq!(response.error.as_deref(), Some("Invalid 'value' field"));
    }

    #[test]
    fn test_string_value_starts_fresh_episode() {
        let mut data = b"hello\0\0\0".to_vec();
        data.extend_from_slice(&100u32.to_le_bytes());
        let (dispatcher, session, _) =
            dispatcher_with(MockProcess::new(42, "demo").with_region(0x1000, data));
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));

        dispatcher.dispatch(session, &json!({"command": "scan_memory", "value": 100}));
        // A string value ignores scan_type=next and sweeps fresh
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "scan_memory", "value": "hello", "scan_type": "next"}),
        );
        assert_eq!(response.result, Some(json!(1)));
    }

    #[test]
    fn test_read_write_numeric() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));

        let response = dispatcher.dispatch(
            session,
            &json!({"command": "write_memory", "address": "0x1004", "value": -3, "width": 4, "signed": true}),
        );
        assert_eq!(
            response.message.as_deref(),
            Some("Memory written successfully")
        );

        let response = dispatcher.dispatch(
            session,
            &json!({"command": "read_memory", "address": 0x1004, "width": 4, "signed": true}),
        );
        assert_eq!(response.result, Some(json!(-3)));

        // The same bytes read unsigned
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "read_memory", "address": 0x1004}),
        );
        assert_eq!(response.result, Some(json!(u32::MAX - 2)));
    }

    #[test]
    fn test_read_string_stops_at_nul() {
        let (dispatcher, session, _) = dispatcher_with(
            MockProcess::new(42, "demo").with_region(0x1000, b"player one\0garbage".to_vec()),
        );
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "read_memory", "address": 0x1000, "is_string": true, "max_length": 64}),
        );
        assert_eq!(response.result, Some(json!("player one")));
    }

    #[test]
    fn test_get_processes() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        let response = dispatcher.dispatch(session, &json!({"command": "get_processes"}));
        assert_eq!(
            response.result,
            Some(json!([{"pid": 42, "name": "demo"}]))
        );
    }

    #[test]
    fn test_get_memory_maps() {
        let (dispatcher, session, _) = dispatcher_with(
            MockProcess::new(42, "demo")
                .with_region(0x1000, vec![0; 8])
                .with_module(0x400000, 0x1000, "/usr/bin/demo"),
        );
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        let response = dispatcher.dispatch(session, &json!({"command": "get_memory_maps"}));
        let maps = response.result.unwrap();
        assert_eq!(maps[0]["name"], "demo");
        assert_eq!(maps[0]["base_address"], "0x400000");
    }

    #[test]
    fn test_timing_counts_executed_commands() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        dispatcher.dispatch(session, &json!({"command": "scan_memory", "value": 100}));
        dispatcher.dispatch(session, &json!({"command": "scan_memory", "value": 100, "scan_type": "next"}));

        let response = dispatcher.dispatch(session, &json!({"command": "get_timing_stats"}));
        let stats = response.result.unwrap();
        assert_eq!(stats["attach"]["count"], 1);
        assert_eq!(stats["scan_memory"]["count"], 2);
        // Unknown commands are not timed
        dispatcher.dispatch(session, &json!({"command": "frobnicate"}));
        assert_eq!(dispatcher.timing().count("frobnicate"), 0);
    }

    #[test]
    fn test_failed_commands_are_timed() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "detach"}));
        assert_eq!(dispatcher.timing().count("detach"), 1);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let (dispatcher, session, _) = dispatcher_with(counters_process());
        dispatcher.dispatch(session, &json!({"command": "attach", "target": 42}));
        let response = dispatcher.dispatch(
            session,
            &json!({"command": "get_scan_results", "page_size": 0}),
        );
        assert_eq!(response.error.as_deref(), Some("Invalid 'page_size' field"));
    }

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(parse_address(&json!(4096)).unwrap(), 4096);
        assert_eq!(parse_address(&json!("4096")).unwrap(), 4096);
        assert_eq!(parse_address(&json!("0x1000")).unwrap(), 0x1000);
        assert_eq!(parse_address(&json!("0X1000")).unwrap(), 0x1000);
        assert!(parse_address(&json!("wat")).is_err());
        assert!(parse_address(&json!(null)).is_err());
    }
}
