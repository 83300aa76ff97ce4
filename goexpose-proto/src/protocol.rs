/// Control-channel frame codec.
///
/// Wire form:
/// ```text
/// [len: u16 BE] [JSON body of `len` bytes]
/// ```
/// where the JSON body is `{"Typ": <u8>, "Data": [<string>, ...]}`.
///
/// The sources this protocol was distilled from assumed one JSON object per
/// transport read, which does not hold over TCP. The 2-byte length prefix
/// here repairs that.
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected rather than read into memory.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Unpair = 200,
    ExposeTcp = 201,
    HideTcp = 202,
    ExposeUdp = 203,
    HideUdp = 204,
    Connect = 205,
    /// Private synchronization signal for the egress task. Never put on the wire.
    Stop = 0,
}

impl FrameType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Stop),
            200 => Some(Self::Unpair),
            201 => Some(Self::ExposeTcp),
            202 => Some(Self::HideTcp),
            203 => Some(Self::ExposeUdp),
            204 => Some(Self::HideUdp),
            205 => Some(Self::Connect),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("frame of {0} bytes exceeds the configured max of {1} bytes")]
    FrameTooLarge(usize, usize),
    #[error("malformed frame body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),
    #[error("Stop is a private frame type and must never be put on the wire")]
    PrivateFrameType,
    #[error("malformed frame payload: {0}")]
    Payload(String),
    #[error("connection closed mid-frame")]
    Eof,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A decoded/to-be-encoded control-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub typ: FrameType,
    pub data: Vec<String>,
}

impl ControlFrame {
    pub fn unpair() -> Self {
        Self { typ: FrameType::Unpair, data: Vec::new() }
    }

    pub fn expose_tcp(port: u16) -> Self {
        Self { typ: FrameType::ExposeTcp, data: vec![port.to_string()] }
    }

    pub fn hide_tcp(port: u16) -> Self {
        Self { typ: FrameType::HideTcp, data: vec![port.to_string()] }
    }

    pub fn expose_udp() -> Self {
        Self { typ: FrameType::ExposeUdp, data: Vec::new() }
    }

    pub fn hide_udp() -> Self {
        Self { typ: FrameType::HideUdp, data: Vec::new() }
    }

    pub fn connect(external_port: u16, proxy_port: u16) -> Self {
        Self {
            typ: FrameType::Connect,
            data: vec![external_port.to_string(), proxy_port.to_string()],
        }
    }

    /// Parse the single port carried by `ExposeTcp`/`HideTcp`.
    pub fn port(&self) -> Result<u16, ProtoError> {
        self.data
            .first()
            .ok_or_else(|| ProtoError::Payload("missing port field".into()))?
            .parse()
            .map_err(|_| ProtoError::Payload("port field is not a valid u16".into()))
    }

    /// Parse `(external_port, proxy_port)` as carried by `Connect`. Per the
    /// spec's open question, the Client only ever needs entry 0 (the local
    /// port to dial); entry 1 is the Server-side proxy port.
    pub fn connect_ports(&self) -> Result<(u16, u16), ProtoError> {
        if self.data.len() != 2 {
            return Err(ProtoError::Payload("Connect requires exactly two fields".into()));
        }
        let external: u16 = self.data[0]
            .parse()
            .map_err(|_| ProtoError::Payload("external port is not a valid u16".into()))?;
        let proxy: u16 = self.data[1]
            .parse()
            .map_err(|_| ProtoError::Payload("proxy port is not a valid u16".into()))?;
        Ok((external, proxy))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "Typ")]
    typ: u8,
    #[serde(rename = "Data")]
    data: Vec<String>,
}

/// Stateful codec bound to one control connection direction's length limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self { max_frame_len: DEFAULT_MAX_FRAME_LEN }
    }
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Encode a frame into wire bytes (length prefix + JSON body).
    pub fn encode(&self, frame: &ControlFrame) -> Result<Vec<u8>, ProtoError> {
        if frame.typ == FrameType::Stop {
            return Err(ProtoError::PrivateFrameType);
        }
        let wire = WireFrame { typ: frame.typ as u8, data: frame.data.clone() };
        let body = serde_json::to_vec(&wire)?;
        if body.len() > self.max_frame_len || body.len() > u16::MAX as usize {
            return Err(ProtoError::FrameTooLarge(body.len(), self.max_frame_len));
        }
        let mut out = Vec::with_capacity(2 + body.len());
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Write an encoded frame to `writer`.
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &ControlFrame) -> Result<(), ProtoError>
    where
        W: AsyncWrite + Unpin,
    {
        let wire = self.encode(frame)?;
        writer.write_all(&wire).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read and decode exactly one frame from `reader`.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<ControlFrame, ProtoError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 2];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(ProtoError::Eof),
            Err(e) => return Err(e.into()),
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_len {
            return Err(ProtoError::FrameTooLarge(len, self.max_frame_len));
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof { ProtoError::Eof } else { ProtoError::Io(e) }
        })?;

        let wire: WireFrame = serde_json::from_slice(&body)?;
        let typ = FrameType::from_u8(wire.typ).ok_or(ProtoError::UnknownFrameType(wire.typ))?;
        Ok(ControlFrame { typ, data: wire.data })
    }
}
