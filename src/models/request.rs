use std::net::IpAddr;

/// The slice of an inbound HTTP request that the gate components inspect.
/// Built once per request by the gate middleware.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub client_ip: IpAddr,

    pub method: String,

    pub path: String,

    /// Raw query string without the leading `?`.
    pub query: Option<String>,

    pub host: Option<String>,

    pub referer: Option<String>,

    pub user_agent: Option<String>,

    /// Parsed-form body text (JSON or urlencoded); empty for other bodies.
    pub body: String,
}

impl GateRequest {
    pub fn new(client_ip: IpAddr, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client_ip,
            method: method.into(),
            path: path.into(),
            query: None,
            host: None,
            referer: None,
            user_agent: None,
            body: String::new(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Path plus query, as the client sent it.
    pub fn original_url(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }

    /// Body, raw URL and decoded query concatenated for pattern scanning.
    pub fn scan_text(&self) -> String {
        let url = self.original_url();
        let query = self.query.as_deref().map(url_decode).unwrap_or_default();
        let mut text = String::with_capacity(self.body.len() + url.len() + query.len());
        text.push_str(&self.body);
        text.push_str(&url);
        text.push_str(&query);
        text
    }
}

/// Percent-decoding for query strings; `+` becomes a space.
fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(v) => {
                        out.push(v);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_url_and_scan_text() {
        let req = GateRequest::new("10.0.0.1".parse().unwrap(), "GET", "/api/services")
            .with_query("page=2")
            .with_body("{\"a\":1}");
        assert_eq!(req.original_url(), "/api/services?page=2");
        assert_eq!(req.scan_text(), "{\"a\":1}/api/services?page=2page=2");
    }

    #[test]
    fn test_query_decoded_for_scanning() {
        let req = GateRequest::new("10.0.0.1".parse().unwrap(), "GET", "/")
            .with_query("q=%3Cscript%3E+x%2");
        assert!(req.scan_text().ends_with("q=<script> x%2"));
        assert_eq!(url_decode("100%"), "100%");
    }
}
