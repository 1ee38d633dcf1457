// Newline-delimited JSON framing between the host and a worker process
//
// request: {"type":"tick"}
// reply:   {"status":"ok"} | {"status":"error","message":"..."}

use super::{WorkerReply, WorkerSignal};
use crate::errors::DispatchError;

pub fn encode_signal(signal: &WorkerSignal) -> Result<String, DispatchError> {
    encode_line(signal)
}

pub fn decode_signal(line: &str) -> Result<WorkerSignal, DispatchError> {
    decode_line(line)
}

pub fn encode_reply(reply: &WorkerReply) -> Result<String, DispatchError> {
    encode_line(reply)
}

pub fn decode_reply(line: &str) -> Result<WorkerReply, DispatchError> {
    decode_line(line)
}

fn encode_line<T: serde::Serialize>(value: &T) -> Result<String, DispatchError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

fn decode_line<T: serde::de::DeserializeOwned>(line: &str) -> Result<T, DispatchError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::Protocol("empty line".to_string()));
    }
    Ok(serde_json::from_str(trimmed)?)
}
