//! PDF codec built on `lopdf`.
//!
//! Only the handful of edits the print pipeline needs: page counting and
//! removal, filled rectangles painted over existing content, and the
//! document-information title.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use thiserror::Error;

/// US Letter in points, used when a page carries no usable `MediaBox`.
const LETTER_BOX: PageBox = PageBox {
    x: 0.0,
    y: 0.0,
    width: 612.0,
    height: 792.0,
};

const MAX_INHERITANCE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PdfError {
    #[error("failed to decode PDF: {0}")]
    Decode(String),
    #[error("failed to encode PDF: {0}")]
    Encode(String),
    #[error("page index {index} out of range for a {count}-page document")]
    PageOutOfRange { index: usize, count: usize },
    #[error("malformed PDF structure: {0}")]
    Malformed(String),
}

impl From<lopdf::Error> for PdfError {
    fn from(err: lopdf::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Device RGB color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    /// Build from a `0xRRGGBB` literal.
    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xff) as f32 / 255.0,
            g: ((hex >> 8) & 0xff) as f32 / 255.0,
            b: (hex & 0xff) as f32 / 255.0,
        }
    }
}

/// Page rectangle in default user space (points, origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilledRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub color: Rgb,
    /// Fill alpha; `1.0` paints opaque without touching page resources.
    pub opacity: f32,
}

pub struct PdfDocument {
    inner: Document,
}

impl PdfDocument {
    pub fn decode(bytes: &[u8]) -> Result<Self, PdfError> {
        let inner = Document::load_mem(bytes).map_err(|err| PdfError::Decode(err.to_string()))?;
        Ok(Self { inner })
    }

    pub fn encode(&mut self) -> Result<Vec<u8>, PdfError> {
        let mut buffer = Vec::new();
        self.inner
            .save_to(&mut buffer)
            .map_err(|err| PdfError::Encode(err.to_string()))?;
        Ok(buffer)
    }

    pub fn page_count(&self) -> usize {
        self.inner.get_pages().len()
    }

    /// Remove the page at zero-based `index`.
    pub fn remove_page(&mut self, index: usize) -> Result<(), PdfError> {
        let count = self.page_count();
        if index >= count {
            return Err(PdfError::PageOutOfRange { index, count });
        }
        let page_number = u32::try_from(index + 1)
            .map_err(|_| PdfError::Malformed(format!("page index {index} exceeds u32")))?;
        self.inner.delete_pages(&[page_number]);

        if self.page_count() + 1 != count {
            return Err(PdfError::Malformed(format!(
                "page tree still lists {} pages after removing page {page_number}",
                self.page_count()
            )));
        }
        Ok(())
    }

    /// Geometry of the page at `index`, following `MediaBox` inheritance.
    pub fn page_box(&self, index: usize) -> Result<PageBox, PdfError> {
        let page_id = self.page_id(index)?;
        let media_box = self.inherited_attribute(page_id, b"MediaBox")?;
        Ok(media_box
            .and_then(|object| self.parse_box(object))
            .unwrap_or(LETTER_BOX))
    }

    /// Paint `rect` above the existing content of the page at `index`.
    ///
    /// The original content is wrapped in a saved graphics state so its
    /// transforms cannot leak into the rectangle.
    pub fn draw_filled_rect(&mut self, index: usize, rect: FilledRect) -> Result<(), PdfError> {
        let page_id = self.page_id(index)?;

        let mut ops = String::from("Q\nq\n");
        if rect.opacity < 1.0 {
            let state = self.register_opacity_state(page_id, rect.opacity)?;
            ops.push_str(&format!("/{state} gs\n"));
        }
        ops.push_str(&format!(
            "{:.4} {:.4} {:.4} rg\n{:.2} {:.2} {:.2} {:.2} re\nf\nQ\n",
            rect.color.r, rect.color.g, rect.color.b, rect.x, rect.y, rect.width, rect.height
        ));

        self.wrap_page_content(page_id, b"q\n".to_vec(), ops.into_bytes())
    }

    /// Embed `title` as the document-information `Title`.
    pub fn set_title(&mut self, title: &str) -> Result<(), PdfError> {
        let value = encode_text_string(title);
        if let Some(info_id) = self.info_reference() {
            if let Ok(info) = self
                .inner
                .get_object_mut(info_id)
                .and_then(Object::as_dict_mut)
            {
                info.set("Title", value);
                return Ok(());
            }
        }

        let mut info = match self.inner.trailer.get(b"Info") {
            Ok(Object::Dictionary(existing)) => existing.clone(),
            _ => Dictionary::new(),
        };
        info.set("Title", value);
        let info_id = self.inner.add_object(Object::Dictionary(info));
        self.inner.trailer.set("Info", Object::Reference(info_id));
        Ok(())
    }

    /// The document-information `Title`, if present and non-empty.
    pub fn title(&self) -> Option<String> {
        let info = match self.inner.trailer.get(b"Info").ok()? {
            Object::Reference(id) => self.inner.get_dictionary(*id).ok()?,
            Object::Dictionary(dict) => dict,
            _ => return None,
        };
        let title = match info.get(b"Title").ok()? {
            Object::Reference(id) => self.inner.get_object(*id).ok()?,
            other => other,
        };
        match title {
            Object::String(bytes, _) => {
                let decoded = decode_text_string(bytes);
                let trimmed = decoded.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn content_streams(&self, index: usize) -> Vec<Vec<u8>> {
        let Ok(page_id) = self.page_id(index) else {
            return Vec::new();
        };
        self.inner
            .get_page_contents(page_id)
            .into_iter()
            .filter_map(|id| self.inner.get_object(id).ok())
            .filter_map(|object| object.as_stream().ok())
            .map(|stream| stream.content.clone())
            .collect()
    }

    fn page_id(&self, index: usize) -> Result<ObjectId, PdfError> {
        let pages = self.inner.get_pages();
        let count = pages.len();
        pages
            .values()
            .nth(index)
            .copied()
            .ok_or(PdfError::PageOutOfRange { index, count })
    }

    fn info_reference(&self) -> Option<ObjectId> {
        match self.inner.trailer.get(b"Info") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        }
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> Result<&'a Object, PdfError> {
        match object {
            Object::Reference(id) => Ok(self.inner.get_object(*id)?),
            other => Ok(other),
        }
    }

    /// Look `key` up on the page, then on its ancestors in the page tree.
    fn inherited_attribute(
        &self,
        page_id: ObjectId,
        key: &[u8],
    ) -> Result<Option<&Object>, PdfError> {
        let mut node = self.inner.get_dictionary(page_id)?;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            if let Ok(value) = node.get(key) {
                return Ok(Some(self.resolve(value)?));
            }
            match node.get(b"Parent").and_then(Object::as_reference) {
                Ok(parent_id) => node = self.inner.get_dictionary(parent_id)?,
                Err(_) => return Ok(None),
            }
        }
        Err(PdfError::Malformed(
            "page tree inheritance chain too deep".to_string(),
        ))
    }

    fn parse_box(&self, object: &Object) -> Option<PageBox> {
        let items = object.as_array().ok()?;
        if items.len() != 4 {
            return None;
        }
        let mut values = [0.0f32; 4];
        for (slot, item) in values.iter_mut().zip(items) {
            *slot = number(self.resolve(item).ok()?)?;
        }
        let [x0, y0, x1, y1] = values;
        let width = (x1 - x0).abs();
        let height = (y1 - y0).abs();
        if width == 0.0 || height == 0.0 {
            return None;
        }
        Some(PageBox {
            x: x0.min(x1),
            y: y0.min(y1),
            width,
            height,
        })
    }

    /// Surround the page's content streams with `head` and `tail` streams.
    fn wrap_page_content(
        &mut self,
        page_id: ObjectId,
        head: Vec<u8>,
        tail: Vec<u8>,
    ) -> Result<(), PdfError> {
        let existing = {
            let page = self.inner.get_dictionary(page_id)?;
            match page.get(b"Contents") {
                Ok(Object::Reference(id)) => match self.inner.get_object(*id)? {
                    Object::Array(items) => items.clone(),
                    _ => vec![Object::Reference(*id)],
                },
                Ok(Object::Array(items)) => items.clone(),
                _ => Vec::new(),
            }
        };

        let head_id = self
            .inner
            .add_object(Stream::new(Dictionary::new(), head));
        let tail_id = self
            .inner
            .add_object(Stream::new(Dictionary::new(), tail));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(head_id));
        contents.extend(existing);
        contents.push(Object::Reference(tail_id));

        self.inner
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)?
            .set("Contents", Object::Array(contents));
        Ok(())
    }

    /// Register an `ExtGState` with the given fill/stroke alpha on the page
    /// and return its resource name.
    fn register_opacity_state(&mut self, page_id: ObjectId, opacity: f32) -> Result<String, PdfError> {
        let opacity = opacity.clamp(0.0, 1.0);
        let name = format!("DocprintAlpha{}", (opacity * 1000.0).round() as u32);
        let state_id = self.inner.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => Object::Real(opacity.into()),
            "CA" => Object::Real(opacity.into()),
        });

        let resources_id = self.page_resources(page_id)?;
        let resources = match resources_id {
            Some(id) => self.inner.get_object_mut(id).and_then(Object::as_dict_mut)?,
            None => self
                .inner
                .get_object_mut(page_id)
                .and_then(Object::as_dict_mut)?
                .get_mut(b"Resources")
                .and_then(Object::as_dict_mut)?,
        };

        let states_ref = resources
            .get(b"ExtGState")
            .and_then(Object::as_reference)
            .ok();
        match states_ref {
            Some(states_id) => {
                self.inner
                    .get_object_mut(states_id)
                    .and_then(Object::as_dict_mut)?
                    .set(name.as_bytes(), Object::Reference(state_id));
            }
            None => {
                if let Ok(states) = resources
                    .get_mut(b"ExtGState")
                    .and_then(Object::as_dict_mut)
                {
                    states.set(name.as_bytes(), Object::Reference(state_id));
                } else {
                    let mut states = Dictionary::new();
                    states.set(name.as_bytes(), Object::Reference(state_id));
                    resources.set("ExtGState", Object::Dictionary(states));
                }
            }
        }
        Ok(name)
    }

    /// Locate the page's resource dictionary, giving the page its own copy
    /// when resources are inherited or missing.
    ///
    /// Returns the object id when resources live in a separate object and
    /// `None` when they are stored inline on the page.
    fn page_resources(&mut self, page_id: ObjectId) -> Result<Option<ObjectId>, PdfError> {
        let page = self.inner.get_dictionary(page_id)?;
        match page.get(b"Resources") {
            Ok(Object::Reference(id)) => return Ok(Some(*id)),
            Ok(Object::Dictionary(_)) => return Ok(None),
            _ => {}
        }

        let inherited = match self.inherited_attribute(page_id, b"Resources")? {
            Some(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        };
        self.inner
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)?
            .set("Resources", Object::Dictionary(inherited));
        Ok(None)
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

/// Encode a PDF text string: literal for plain ASCII, UTF-16BE with BOM otherwise.
fn encode_text_string(text: &str) -> Object {
    let plain = text
        .chars()
        .all(|ch| ch.is_ascii() && !ch.is_ascii_control() && !matches!(ch, '(' | ')' | '\\'));
    if plain {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    // PDFDocEncoding agrees with Latin-1 for printable characters.
    bytes.iter().map(|&byte| char::from(byte)).collect()
}
