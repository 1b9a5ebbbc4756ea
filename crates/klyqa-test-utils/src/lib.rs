//! In-process virtual device harness for exercising the local protocol
//! engine over real loopback sockets, grounded on the same "connect, drive
//! a scripted handshake, assert on what comes back" shape as a mock
//! protocol peer.

use klyqa_protocol::aes_session::{AesKey, AesSession, Iv};
use klyqa_protocol::frame::{self, FrameParser, FrameType};
use rand::RngCore;
use serde_json::json;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Identity fields a virtual device announces in its first frame.
#[derive(Debug, Clone)]
pub struct VirtualDeviceIdentity {
    pub unit_id: String,
    pub product_id: String,
    pub fw_version: String,
    pub fw_build: String,
    pub hw_version: String,
    pub manufacturer_id: String,
}

impl VirtualDeviceIdentity {
    pub fn light(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_owned(),
            product_id: "@klyqa.lighting.rgb-cw-ww.e27".to_owned(),
            fw_version: "1.0.0".to_owned(),
            fw_build: "1".to_owned(),
            hw_version: "1".to_owned(),
            manufacturer_id: "QCX".to_owned(),
        }
    }

    pub fn vacuum(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_owned(),
            product_id: "@klyqa.cleaning.vc1".to_owned(),
            fw_version: "1.0.0".to_owned(),
            fw_build: "1".to_owned(),
            hw_version: "1".to_owned(),
            manufacturer_id: "QCX".to_owned(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "type": "ident",
            "ident": {
                "fw_version": self.fw_version,
                "fw_build": self.fw_build,
                "hw_version": self.hw_version,
                "manufacturer_id": self.manufacturer_id,
                "product_id": self.product_id,
                "unit_id": self.unit_id,
            }
        })
    }
}

/// A TCP client that plays the device side of the wire protocol: connects,
/// sends an identity frame, completes the IV handshake, and can then
/// exchange encrypted type-2 frames.
pub struct VirtualDevice {
    stream: TcpStream,
    parser: FrameParser,
    local_iv: Iv,
    session: Option<AesSession>,
}

impl VirtualDevice {
    /// Open a TCP connection to the host and send the identity frame.
    pub async fn connect(addr: SocketAddr, identity: &VirtualDeviceIdentity) -> std::io::Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let payload = identity.to_json().to_string();
        stream
            .write_all(&frame::emit(payload.as_bytes(), FrameType::Identity))
            .await?;
        let mut local_iv = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut local_iv);
        Ok(Self {
            stream,
            parser: FrameParser::new(),
            local_iv,
            session: None,
        })
    }

    async fn read_one_frame(&mut self) -> std::io::Result<frame::Frame> {
        loop {
            if let Some(f) = self.parser.next_frame().map_err(to_io_err)? {
                return Ok(f);
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
            }
            self.parser.feed(&buf[..n]);
        }
    }

    /// Receive the host's IV frame, reply with this device's own IV, and
    /// derive the AES session from `key`.
    pub async fn complete_handshake(&mut self, key: &AesKey) -> std::io::Result<()> {
        let frame = self.read_one_frame().await?;
        if frame.frame_type != FrameType::InitialVector || frame.payload.len() != 8 {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected host IV"));
        }
        let mut remote_iv = [0u8; 8];
        remote_iv.copy_from_slice(&frame.payload);

        self.stream
            .write_all(&frame::emit(&self.local_iv, FrameType::InitialVector))
            .await?;

        self.session = Some(AesSession::new(key, &self.local_iv, &remote_iv));
        Ok(())
    }

    /// Receive and decrypt the next type-2 (Data) frame as JSON.
    pub async fn recv_command(&mut self) -> std::io::Result<serde_json::Value> {
        let frame = self.read_one_frame().await?;
        if frame.frame_type != FrameType::Data {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected data frame"));
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no session"))?;
        let plain = session.decrypt_receiving(&frame.payload).map_err(to_io_err)?;
        serde_json::from_str(&plain).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Encrypt and send `json` as a type-2 (Data) frame.
    pub async fn send_answer(&mut self, json: &serde_json::Value) -> std::io::Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no session"))?;
        let ciphertext = session.encrypt_sending(&json.to_string());
        self.stream
            .write_all(&frame::emit(&ciphertext, FrameType::Data))
            .await
    }

    /// Close the underlying socket, simulating the device dropping off.
    pub async fn disconnect(mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

fn to_io_err<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn virtual_device_completes_identity_and_handshake_against_a_plain_echo_host() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let key: AesKey = *b"0123456789abcdef";

        let host = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let mut parser = FrameParser::new();
            parser.feed(&buf[..n]);
            let ident = parser.next_frame().unwrap().unwrap();
            assert_eq!(ident.frame_type, FrameType::Identity);

            let mut host_iv = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut host_iv);
            sock.write_all(&frame::emit(&host_iv, FrameType::InitialVector))
                .await
                .unwrap();

            let n = sock.read(&mut buf).await.unwrap();
            parser.feed(&buf[..n]);
            let remote_iv_frame = parser.next_frame().unwrap().unwrap();
            assert_eq!(remote_iv_frame.frame_type, FrameType::InitialVector);
        });

        let identity = VirtualDeviceIdentity::light("29daa5a4439969f57934");
        let mut device = VirtualDevice::connect(addr, &identity).await.unwrap();
        device.complete_handshake(&key).await.unwrap();
        host.await.unwrap();
    }
}
