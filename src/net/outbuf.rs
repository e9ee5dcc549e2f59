//! Per-connection write buffer.
//!
//! A growable byte buffer with typed framing helpers for every protocol
//! the server speaks. Handlers append frames; the connection flushes the
//! whole buffer at the end of each processing round.

use bytes::{BufMut, BytesMut};

#[derive(Default)]
pub struct OutBuf {
    buf: BytesMut,
}

impl OutBuf {
    pub fn new() -> OutBuf {
        OutBuf::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Rolls back to a previous length (noreply suppression).
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Takes the pending bytes for flushing.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    pub fn write_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Writes a one-line frame, scrubbing control bytes from the payload.
    fn write_line(&mut self, prefix: u8, data: &[u8]) {
        self.buf.reserve(3 + data.len());
        self.buf.put_u8(prefix);
        for &b in data {
            self.buf.put_u8(if b < b' ' { b' ' } else { b });
        }
        self.buf.put_slice(b"\r\n");
    }

    // ---- RESP -----------------------------------------------------------

    pub fn resp_simple(&mut self, s: &str) {
        self.write_line(b'+', s.as_bytes());
    }

    pub fn resp_error(&mut self, msg: &str) {
        self.write_line(b'-', msg.as_bytes());
    }

    pub fn resp_bulk(&mut self, data: &[u8]) {
        let mut head = itoa_buf(data.len() as i64);
        head.insert(0, b'$');
        head.extend_from_slice(b"\r\n");
        self.buf.reserve(head.len() + data.len() + 2);
        self.buf.put_slice(&head);
        self.buf.put_slice(data);
        self.buf.put_slice(b"\r\n");
    }

    pub fn resp_null(&mut self) {
        self.buf.put_slice(b"$-1\r\n");
    }

    pub fn resp_array(&mut self, count: usize) {
        self.write_line(b'*', &itoa_buf(count as i64));
    }

    pub fn resp_int(&mut self, value: i64) {
        self.write_line(b':', &itoa_buf(value));
    }

    /// Unsigned integers go out as simple strings so the full 64-bit
    /// range survives.
    pub fn resp_uint(&mut self, value: u64) {
        self.write_line(b'+', value.to_string().as_bytes());
    }

    // ---- HTTP -----------------------------------------------------------

    pub fn http_response(&mut self, code: u16, status: &str, body: &[u8]) {
        self.http_response_typed(code, status, "text/plain", body);
    }

    pub fn http_response_typed(&mut self, code: u16, status: &str, ctype: &str, body: &[u8]) {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: Close\r\n\r\n",
            code,
            status,
            ctype,
            body.len()
        );
        self.buf.reserve(head.len() + body.len());
        self.buf.put_slice(head.as_bytes());
        self.buf.put_slice(body);
    }

    // ---- Postgres -------------------------------------------------------

    fn pg_frame(&mut self, tag: u8, payload: &[u8]) {
        self.buf.reserve(5 + payload.len());
        self.buf.put_u8(tag);
        self.buf.put_i32((payload.len() + 4) as i32);
        self.buf.put_slice(payload);
    }

    /// Single-byte SSL refusal.
    pub fn pg_ssl_refuse(&mut self) {
        self.buf.put_u8(b'N');
    }

    pub fn pg_auth_cleartext(&mut self) {
        self.pg_frame(b'R', &3i32.to_be_bytes());
    }

    pub fn pg_auth_ok(&mut self) {
        self.pg_frame(b'R', &0i32.to_be_bytes());
    }

    pub fn pg_parameter_status(&mut self, name: &str, value: &str) {
        let mut payload = Vec::with_capacity(name.len() + value.len() + 2);
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.pg_frame(b'S', &payload);
    }

    pub fn pg_ready(&mut self) {
        self.pg_frame(b'Z', b"I");
    }

    pub fn pg_empty_query(&mut self) {
        self.pg_frame(b'I', b"");
    }

    pub fn pg_row_desc(&mut self, cols: &[&str]) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(cols.len() as i16).to_be_bytes());
        for col in cols {
            payload.extend_from_slice(col.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&0i32.to_be_bytes()); // table oid
            payload.extend_from_slice(&0i16.to_be_bytes()); // column attr
            payload.extend_from_slice(&25i32.to_be_bytes()); // text oid
            payload.extend_from_slice(&(-1i16).to_be_bytes()); // type len
            payload.extend_from_slice(&(-1i32).to_be_bytes()); // type mod
            payload.extend_from_slice(&0i16.to_be_bytes()); // text format
        }
        self.pg_frame(b'T', &payload);
    }

    pub fn pg_row_data(&mut self, values: &[Option<&[u8]>]) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(values.len() as i16).to_be_bytes());
        for value in values {
            match value {
                Some(v) => {
                    payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    payload.extend_from_slice(v);
                }
                None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        self.pg_frame(b'D', &payload);
    }

    pub fn pg_complete(&mut self, tag: &str) {
        let mut payload = Vec::with_capacity(tag.len() + 1);
        payload.extend_from_slice(tag.as_bytes());
        payload.push(0);
        self.pg_frame(b'C', &payload);
    }

    pub fn pg_error(&mut self, msg: &str) {
        let mut payload = Vec::new();
        payload.push(b'S');
        payload.extend_from_slice(b"ERROR\0");
        payload.push(b'C');
        payload.extend_from_slice(b"XX000\0");
        payload.push(b'M');
        payload.extend_from_slice(msg.as_bytes());
        payload.push(0);
        payload.push(0);
        self.pg_frame(b'E', &payload);
    }
}

fn itoa_buf(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}
