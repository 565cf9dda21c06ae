//! RSS document parser.
//!
//! Streams the document with quick-xml and extracts channel metadata plus
//! one descriptor per `<item>`. Element names are matched including their
//! namespace prefix, so `<atom:link>` or `<itunes:title>` never shadow the
//! plain RSS elements.

use std::borrow::Cow;

use quick_xml::escape::{resolve_html5_entity, unescape};
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{AggregatorError, Result};
use crate::rss::types::{RemoteFeedDocument, RemoteItem};

/// Parse a feed document.
///
/// Text is decoded with the encoding named in the XML declaration (UTF-8
/// when there is none). Fails with `AggregatorError::Parse` when the bytes
/// are not well-formed XML or contain no `<channel>`. Items without a title
/// or description are dropped and counted in `skipped_items`; the rest of the
/// document is kept.
pub fn parse_feed(body: &[u8]) -> Result<RemoteFeedDocument> {
    let mut reader = Reader::from_reader(body);

    let mut builder = DocumentBuilder::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => builder.open(e.name().as_ref()),
            Ok(Event::Empty(e)) => {
                builder.open(e.name().as_ref());
                builder.close();
            }
            Ok(Event::End(_)) => builder.close(),
            Ok(Event::Text(e)) => {
                let raw = decode_text(&reader, &e)?;
                builder.text(&unescape_lenient(&raw));
            }
            Ok(Event::CData(e)) => builder.text(&decode_text(&reader, &e)?),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AggregatorError::Parse(format!(
                    "malformed XML at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    builder.finish()
}

fn decode_text<'b>(reader: &Reader<&[u8]>, bytes: &'b [u8]) -> Result<Cow<'b, str>> {
    reader.decoder().decode(bytes).map_err(|e| {
        AggregatorError::Parse(format!(
            "undecodable text at position {}: {}",
            reader.buffer_position(),
            e
        ))
    })
}

/// Resolve character references, the XML entities and the HTML5 named
/// entities. Any other `&name;` is kept as written.
fn unescape_lenient(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let reference = rest.find(';').map(|end| &rest[..=end]).filter(|r| {
            r.len() > 2
                && r[1..r.len() - 1]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '#')
        });
        let Some(reference) = reference else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };

        match unescape(reference) {
            Ok(resolved) => out.push_str(&resolved),
            Err(_) => {
                let name = &reference[1..reference.len() - 1];
                out.push_str(resolve_html5_entity(name).unwrap_or(reference));
            }
        }
        rest = &rest[reference.len()..];
    }

    out.push_str(rest);
    out
}

fn trimmed(field: Option<String>) -> Option<String> {
    field
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Default)]
struct ItemBuilder {
    title: Option<String>,
    description: Option<String>,
    link: Option<String>,
    pub_date: Option<String>,
}

impl ItemBuilder {
    fn build(self) -> Option<RemoteItem> {
        let title = trimmed(self.title)?;
        let description = trimmed(self.description)?;
        Some(RemoteItem {
            title,
            description,
            link: trimmed(self.link).unwrap_or_default(),
            pub_date: trimmed(self.pub_date).unwrap_or_default(),
        })
    }
}

/// Tracks the open-element stack and routes text to channel or item fields.
#[derive(Default)]
struct DocumentBuilder {
    stack: Vec<Vec<u8>>,
    channel_depth: Option<usize>,
    item: Option<(usize, ItemBuilder)>,
    document: RemoteFeedDocument,
}

impl DocumentBuilder {
    fn open(&mut self, name: &[u8]) {
        let depth = self.stack.len();
        match name {
            b"channel" if self.channel_depth.is_none() => self.channel_depth = Some(depth),
            b"item" if self.item.is_none() => self.item = Some((depth, ItemBuilder::default())),
            _ => {}
        }
        self.stack.push(name.to_vec());
    }

    fn close(&mut self) {
        self.stack.pop();
        let depth = self.stack.len();

        if matches!(self.item, Some((item_depth, _)) if item_depth == depth) {
            if let Some((_, item)) = self.item.take() {
                match item.build() {
                    Some(item) => self.document.items.push(item),
                    None => self.document.skipped_items += 1,
                }
            }
        }
    }

    fn text(&mut self, text: &str) {
        if let Some((item_depth, item)) = self.item.as_mut() {
            // Anything below a direct child of <item> belongs to that child.
            let Some(field) = self.stack.get(*item_depth + 1) else {
                return;
            };
            let slot = match field.as_slice() {
                b"title" => &mut item.title,
                b"description" => &mut item.description,
                b"link" => &mut item.link,
                b"pubDate" => &mut item.pub_date,
                _ => return,
            };
            slot.get_or_insert_with(String::new).push_str(text);
            return;
        }

        let Some(channel_depth) = self.channel_depth else {
            return;
        };
        // Only direct text children of <channel>, so <image><title> is ignored.
        if self.stack.len() != channel_depth + 2 {
            return;
        }
        let slot = match self.stack[channel_depth + 1].as_slice() {
            b"title" => &mut self.document.title,
            b"description" => &mut self.document.description,
            b"link" => &mut self.document.link,
            b"lastBuildDate" => &mut self.document.last_build_date,
            _ => return,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }

    fn finish(mut self) -> Result<RemoteFeedDocument> {
        if !self.stack.is_empty() {
            return Err(AggregatorError::Parse(
                "unexpected end of document".to_string(),
            ));
        }
        if self.channel_depth.is_none() {
            return Err(AggregatorError::Parse(
                "document has no <channel> element".to_string(),
            ));
        }

        let document = &mut self.document;
        document.title = trimmed(document.title.take());
        document.description = trimmed(document.description.take());
        document.link = trimmed(document.link.take());
        document.last_build_date = trimmed(document.last_build_date.take());
        Ok(self.document)
    }
}
