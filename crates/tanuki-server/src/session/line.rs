//! Line discipline for raw client bytes.
//!
//! Clients arrive as netcat, telnet or scripted bots, so input is taken as it
//! comes: `\n`, `\r` and `\r\n` all end a line, backspace edits, other
//! control bytes and telnet negotiation are dropped, and invalid UTF-8 is
//! replaced rather than rejected. Nothing is echoed.

use std::borrow::Cow;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

const BS: u8 = 0x08;
const DEL: u8 = 0x7f;
const TAB: u8 = b'\t';

// Telnet (RFC 854).
const IAC: u8 = 0xff;
const SB: u8 = 0xfa;
const SE: u8 = 0xf0;
const WILL: u8 = 0xfb;
const DONT: u8 = 0xfe;

/// Reads terminal lines from a byte stream.
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_bytes: usize,
    /// Last terminator was `\r`; a following `\n` belongs to it.
    after_cr: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_bytes: max_bytes.max(1),
            after_cr: false,
        }
    }

    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// Bytes past `max_bytes` are discarded up to the terminator. A partial
    /// line at end of stream is returned as a line.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf: Vec<u8> = Vec::new();
        let mut saw_any = false;

        loop {
            let Some(byte) = self.next_byte().await? else {
                if saw_any {
                    break;
                }
                return Ok(None);
            };

            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            saw_any = true;

            match byte {
                b'\n' => break,
                b'\r' => {
                    self.after_cr = true;
                    break;
                }
                BS | DEL => pop_char(&mut buf),
                IAC => self.skip_telnet_command().await?,
                TAB => push_capped(&mut buf, byte, self.max_bytes),
                b if b < 0x20 => {}
                b => push_capped(&mut buf, b, self.max_bytes),
            }
        }

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    async fn next_byte(&mut self) -> io::Result<Option<u8>> {
        match self.inner.read_u8().await {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Consume the rest of a telnet command whose IAC was just read.
    async fn skip_telnet_command(&mut self) -> io::Result<()> {
        match self.next_byte().await? {
            Some(WILL..=DONT) => {
                self.next_byte().await?;
            }
            Some(SB) => {
                // Subnegotiation runs until IAC SE.
                let mut prev = 0u8;
                while let Some(b) = self.next_byte().await? {
                    if prev == IAC && b == SE {
                        break;
                    }
                    prev = b;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn push_capped(buf: &mut Vec<u8>, byte: u8, max: usize) {
    if buf.len() < max {
        buf.push(byte);
    }
}

/// Remove the last UTF-8 character, continuation bytes included.
fn pop_char(buf: &mut Vec<u8>) {
    while let Some(b) = buf.pop() {
        if b & 0xc0 != 0x80 {
            break;
        }
    }
}

/// Convert bare `\n` to `\r\n` for network clients.
pub fn to_wire(text: &str, crlf: bool) -> Cow<'_, str> {
    if !crlf || !text.contains('\n') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\n' && prev != '\r' {
            out.push('\r');
        }
        out.push(c);
        prev = c;
    }
    Cow::Owned(out)
}
