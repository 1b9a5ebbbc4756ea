//! In-process virtual device: a standalone simulator that speaks the real
//! wire protocol end to end, for exercising a running controller without
//! real hardware (§2 C10).
//!
//! Unlike `klyqa-test-utils`'s harness (built for driving assertions from
//! inside a test), this crate's [`run_virtual_device`] is a long-running
//! loop suitable for a small emulator binary: connect once, then answer
//! every command it receives until the host closes the connection.

use klyqa_protocol::aes_session::{AesKey, AesSession, Iv};
use klyqa_protocol::frame::{self, FrameParser, FrameType};
use rand::RngCore;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Static identity and behavior for one simulated device.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub unit_id: String,
    pub product_id: String,
    pub key: AesKey,
    pub fw_version: String,
    pub hw_version: String,
    /// How long to wait for the host's initial-vector frame before giving
    /// up on this connection attempt.
    pub handshake_timeout: Duration,
}

impl EmulatorConfig {
    pub fn light(unit_id: &str, key: AesKey) -> Self {
        Self {
            unit_id: unit_id.to_owned(),
            product_id: "@klyqa.lighting.rgb-cw-ww.e27".to_owned(),
            key,
            fw_version: "1.0.0".to_owned(),
            hw_version: "1".to_owned(),
            handshake_timeout: Duration::from_secs(5),
        }
    }

    pub fn vacuum(unit_id: &str, key: AesKey) -> Self {
        Self {
            unit_id: unit_id.to_owned(),
            product_id: "@klyqa.cleaning.vc1".to_owned(),
            key,
            fw_version: "1.0.0".to_owned(),
            hw_version: "1".to_owned(),
            handshake_timeout: Duration::from_secs(5),
        }
    }

    fn identity_json(&self) -> Value {
        json!({
            "type": "ident",
            "ident": {
                "fw_version": self.fw_version,
                "fw_build": "1",
                "hw_version": self.hw_version,
                "manufacturer_id": "QCX",
                "product_id": self.product_id,
                "unit_id": self.unit_id,
            }
        })
    }
}

/// Connect to `host`, complete the identity + IV handshake, then answer
/// every command received with a synthesized response until the host
/// closes the connection. Returns once the connection ends.
pub async fn run_virtual_device(host: SocketAddr, config: &EmulatorConfig) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(host).await?;
    stream
        .write_all(&frame::emit(config.identity_json().to_string().as_bytes(), FrameType::Identity))
        .await?;

    let mut parser = FrameParser::new();
    let Some(iv_frame) = tokio::time::timeout(config.handshake_timeout, read_frame(&mut stream, &mut parser)).await?? else {
        info!(unit_id = %config.unit_id, "no handshake from host, nothing queued");
        return Ok(());
    };
    if iv_frame.frame_type != FrameType::InitialVector || iv_frame.payload.len() != 8 {
        warn!(unit_id = %config.unit_id, "unexpected frame while waiting for host IV");
        return Ok(());
    }
    let mut remote_iv = [0u8; 8];
    remote_iv.copy_from_slice(&iv_frame.payload);

    let mut local_iv: Iv = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut local_iv);
    stream.write_all(&frame::emit(&local_iv, FrameType::InitialVector)).await?;

    let mut session = AesSession::new(&config.key, &local_iv, &remote_iv);
    debug!(unit_id = %config.unit_id, "handshake complete, awaiting commands");

    loop {
        let Some(frame) = read_frame(&mut stream, &mut parser).await? else {
            return Ok(());
        };
        if frame.frame_type != FrameType::Data {
            warn!(unit_id = %config.unit_id, "unexpected non-data frame in connected state");
            continue;
        }
        let Ok(plain) = session.decrypt_receiving(&frame.payload) else {
            warn!(unit_id = %config.unit_id, "could not decrypt incoming frame");
            continue;
        };
        let Ok(received) = serde_json::from_str::<Value>(&plain) else {
            warn!(unit_id = %config.unit_id, "could not parse incoming JSON");
            continue;
        };
        let answer = synthesize_answer(&received);
        let ciphertext = session.encrypt_sending(&answer.to_string());
        stream.write_all(&frame::emit(&ciphertext, FrameType::Data)).await?;
    }
}

async fn read_frame(stream: &mut TcpStream, parser: &mut FrameParser) -> std::io::Result<Option<frame::Frame>> {
    loop {
        if let Ok(Some(f)) = parser.next_frame() {
            return Ok(Some(f));
        }
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        parser.feed(&buf[..n]);
    }
}

/// Build a plausible answer to a request: echo the fields the host asked
/// about, filling any present-and-null field (vacuum get/reset queries)
/// with a synthetic value, and relabel `type` from `request` to
/// `response`.
fn synthesize_answer(received: &Value) -> Value {
    let mut answer = received.clone();
    if let Some(obj) = answer.as_object_mut() {
        if obj.get("type").and_then(Value::as_str) == Some("request") {
            obj.insert("type".to_owned(), json!("response"));
        }
        for (key, value) in obj.iter_mut() {
            if key == "type" || key == "action" {
                continue;
            }
            if value.is_null() {
                *value = synthetic_value_for(key);
            }
        }
    }
    answer
}

fn synthetic_value_for(field: &str) -> Value {
    match field {
        "power" | "cleaning" | "beeping" | "carpetbooster" => json!(false),
        "battery" => json!(80),
        "workingmode" => json!("STANDBY"),
        "workingstatus" => json!("STANDBY"),
        "suction" => json!(1),
        "water" => json!("MID"),
        "direction" => json!("STOP"),
        "errors" => json!([]),
        _ => json!(null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_fills_null_fields_with_synthetic_values() {
        let request = json!({"type": "request", "action": "get", "power": null, "battery": null});
        let answer = synthesize_answer(&request);
        assert_eq!(answer["type"], "response");
        assert_eq!(answer["power"], false);
        assert_eq!(answer["battery"], 80);
    }

    #[test]
    fn synthesize_echoes_non_null_fields_unchanged() {
        let request = json!({"type": "request", "color": {"red": 2, "green": 22, "blue": 222}});
        let answer = synthesize_answer(&request);
        assert_eq!(answer["color"]["red"], 2);
        assert_eq!(answer["type"], "response");
    }
}
