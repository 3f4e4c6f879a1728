#![forbid(unsafe_code)]

//! Minimal XML writer used to serialize DSig elements.

/// Builds XML text element by element.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
    open: Vec<String>,
}

impl XmlWriter {
    /// Create a new XML writer.
    pub fn new() -> Self {
        Self::default()
    }

    fn write_start(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.out.push('<');
        self.out.push_str(name);
        for (k, v) in attrs {
            self.out.push(' ');
            self.out.push_str(k);
            self.out.push_str("=\"");
            self.out.push_str(&escape(v, true));
            self.out.push('"');
        }
    }

    /// Start an element with the given name and attributes.
    pub fn start_element(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.write_start(name, attrs);
        self.out.push('>');
        self.open.push(name.to_owned());
    }

    /// Write an empty element (self-closing).
    pub fn empty_element(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.write_start(name, attrs);
        self.out.push_str("/>");
    }

    /// End the most recently started element.
    pub fn end_element(&mut self) {
        if let Some(name) = self.open.pop() {
            self.out.push_str("</");
            self.out.push_str(&name);
            self.out.push('>');
        }
    }

    /// Write escaped text content.
    pub fn write_text(&mut self, text: &str) {
        self.out.push_str(&escape(text, false));
    }

    /// Write an element containing only text.
    pub fn text_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) {
        self.start_element(name, attrs);
        self.write_text(text);
        self.end_element();
    }

    /// Close any open elements and return the XML text.
    pub fn into_string(mut self) -> String {
        while !self.open.is_empty() {
            self.end_element();
        }
        self.out
    }
}

fn escape(s: &str, attr: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
