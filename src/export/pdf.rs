//! Minimal PDF writer: one page per image, every image stored as a JPEG
//! (DCTDecode) stream and drawn over the whole page at 72 dpi.
//!
//! JPEG pages are embedded byte for byte. Anything else is decoded with the
//! `image` crate, flattened onto white and re-encoded.

use super::{ExportUnit, Exporter, Grouping};
use crate::MangadexError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, Rgb, RgbImage};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

const JPEG_QUALITY: u8 = 90;
const PRODUCER: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy)]
pub struct PdfExporter;

impl Exporter for PdfExporter {
    fn extension(&self) -> Option<&'static str> {
        Some("pdf")
    }

    fn export(&self, unit: &ExportUnit, target: &Path) -> Result<(), MangadexError> {
        if unit.page_count() == 0 {
            return Err(MangadexError::EmptyExport(unit.name.clone()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = target.with_extension("pdf.part");
        let result = write_pdf(unit, &partial);
        match result {
            Ok(pages) => {
                fs::rename(&partial, target)?;
                debug!(target = %target.display(), pages, "pdf written");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }
}

fn write_pdf(unit: &ExportUnit, path: &Path) -> Result<usize, MangadexError> {
    let mut pdf = PdfWriter::new(BufWriter::new(fs::File::create(path)?))?;
    let catalog = pdf.reserve();
    let pages = pdf.reserve();

    let mut kids = Vec::new();
    let mut bookmarks = Vec::new();
    for chapter in &unit.chapters {
        let mut first_page = None;
        for page in &chapter.pages {
            let image = match PdfImage::load(page.path()) {
                Ok(image) => image,
                Err(e) => {
                    warn!(page = %page.path().display(), error = %e, "unreadable image, skipped");
                    continue;
                }
            };
            let page_id = pdf.image_page(pages, &image)?;
            kids.push(page_id);
            first_page.get_or_insert(page_id);
        }
        if let Some(first_page) = first_page {
            bookmarks.push((chapter.chapter.simplified_name(), first_page));
        }
    }
    if kids.is_empty() {
        return Err(MangadexError::EmptyExport(unit.name.clone()));
    }

    let kids_refs: Vec<String> = kids.iter().map(|id| format!("{id} 0 R")).collect();
    pdf.object(
        pages,
        &format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids_refs.join(" "),
            kids.len()
        ),
    )?;

    let mut catalog_dict = format!("<< /Type /Catalog /Pages {pages} 0 R");
    if unit.grouping != Grouping::Chapter && !bookmarks.is_empty() {
        let outlines = pdf.outline(&bookmarks)?;
        catalog_dict.push_str(&format!(" /Outlines {outlines} 0 R /PageMode /UseOutlines"));
    }
    catalog_dict.push_str(" >>");
    pdf.object(catalog, &catalog_dict)?;

    let info = pdf.reserve();
    pdf.object(
        info,
        &format!(
            "<< /Title {} /Subject {} /Producer {} >>",
            pdf_text(&unit.name),
            pdf_text(&unit.series),
            pdf_text(PRODUCER)
        ),
    )?;
    pdf.finish(catalog, info)?;
    Ok(kids.len())
}

struct PdfImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    decode: Option<&'static str>,
    data: Vec<u8>,
}

impl PdfImage {
    fn load(path: &Path) -> Result<Self, MangadexError> {
        let bytes = fs::read(path)?;
        if let Some(info) = jpeg_info(&bytes) {
            let color = match info.components {
                1 => Some(("/DeviceGray", None)),
                3 => Some(("/DeviceRGB", None)),
                // only Adobe (APP14) CMYK jpegs are stored inverted
                4 if info.adobe => Some(("/DeviceCMYK", Some("[1 0 1 0 1 0 1 0]"))),
                4 => Some(("/DeviceCMYK", None)),
                _ => None,
            };
            if let Some((color_space, decode)) = color {
                return Ok(Self {
                    width: info.width,
                    height: info.height,
                    color_space,
                    decode,
                    data: bytes,
                });
            }
        }
        Self::reencode(&bytes)
    }

    fn reencode(bytes: &[u8]) -> Result<Self, MangadexError> {
        let image = image::load_from_memory(bytes)?;
        let rgb = flatten(image);
        let (width, height) = rgb.dimensions();
        let mut data = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY);
            encoder.encode(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
        }
        Ok(Self {
            width,
            height,
            color_space: "/DeviceRGB",
            decode: None,
            data,
        })
    }
}

fn flatten(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u16 * a as u16 + 255 * (255 - a as u16)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JpegInfo {
    width: u32,
    height: u32,
    components: u8,
    /// An APP14 `Adobe` segment precedes the frame.
    adobe: bool,
}

/// Read the frame header of a JPEG without decoding it.
fn jpeg_info(bytes: &[u8]) -> Option<JpegInfo> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    let mut adobe = false;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        match marker {
            0xFF => {
                i += 1;
                continue;
            }
            0x01 | 0xD0..=0xD8 => {
                i += 2;
                continue;
            }
            // scan or end of image before any frame header
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        if len < 2 {
            return None;
        }
        if marker == 0xEE && bytes.get(i + 4..i + 9) == Some(b"Adobe".as_slice()) {
            adobe = true;
        }
        let is_frame = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            let segment = bytes.get(i + 4..i + 2 + len)?;
            if segment.len() < 6 {
                return None;
            }
            let info = JpegInfo {
                height: u16::from_be_bytes([segment[1], segment[2]]) as u32,
                width: u16::from_be_bytes([segment[3], segment[4]]) as u32,
                components: segment[5],
                adobe,
            };
            return (info.width > 0 && info.height > 0).then_some(info);
        }
        i += 2 + len;
    }
    None
}

/// Text string as UTF-16BE hex, safe for any title.
fn pdf_text(value: &str) -> String {
    let mut hex = String::from("<FEFF");
    for unit in value.encode_utf16() {
        hex.push_str(&format!("{unit:04X}"));
    }
    hex.push('>');
    hex
}

struct PdfWriter<W: Write> {
    out: W,
    position: usize,
    offsets: Vec<Option<usize>>,
}

impl<W: Write> PdfWriter<W> {
    fn new(out: W) -> io::Result<Self> {
        let mut writer = Self {
            out,
            position: 0,
            offsets: Vec::new(),
        };
        writer.raw(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n")?;
        Ok(writer)
    }

    fn reserve(&mut self) -> usize {
        self.offsets.push(None);
        self.offsets.len()
    }

    fn raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.position += bytes.len();
        Ok(())
    }

    fn object(&mut self, id: usize, body: &str) -> io::Result<()> {
        self.offsets[id - 1] = Some(self.position);
        self.raw(format!("{id} 0 obj\n{body}\nendobj\n").as_bytes())
    }

    fn stream(&mut self, id: usize, dict: &str, data: &[u8]) -> io::Result<()> {
        self.offsets[id - 1] = Some(self.position);
        self.raw(format!("{id} 0 obj\n<< {dict} /Length {} >>\nstream\n", data.len()).as_bytes())?;
        self.raw(data)?;
        self.raw(b"\nendstream\nendobj\n")
    }

    /// Write an image, its content stream and the page showing it.
    fn image_page(&mut self, parent: usize, image: &PdfImage) -> io::Result<usize> {
        let image_id = self.reserve();
        let contents_id = self.reserve();
        let page_id = self.reserve();
        let (width, height) = (image.width, image.height);

        let mut dict = format!(
            "/Type /XObject /Subtype /Image /Width {width} /Height {height} /ColorSpace {} /BitsPerComponent 8 /Filter /DCTDecode",
            image.color_space
        );
        if let Some(decode) = image.decode {
            dict.push_str(&format!(" /Decode {decode}"));
        }
        self.stream(image_id, &dict, &image.data)?;

        let contents = format!("q {width} 0 0 {height} 0 0 cm /Im0 Do Q\n");
        self.stream(contents_id, "", contents.as_bytes())?;

        self.object(
            page_id,
            &format!(
                "<< /Type /Page /Parent {parent} 0 R /MediaBox [0 0 {width} {height}] /Resources << /XObject << /Im0 {image_id} 0 R >> /ProcSet [/PDF /ImageB /ImageC] >> /Contents {contents_id} 0 R >>"
            ),
        )?;
        Ok(page_id)
    }

    /// One bookmark per `(title, page)`, returns the outline root.
    fn outline(&mut self, bookmarks: &[(String, usize)]) -> io::Result<usize> {
        let root = self.reserve();
        let ids: Vec<usize> = bookmarks.iter().map(|_| self.reserve()).collect();
        for (i, (title, page)) in bookmarks.iter().enumerate() {
            let mut dict = format!(
                "<< /Title {} /Parent {root} 0 R /Dest [{page} 0 R /Fit]",
                pdf_text(title)
            );
            if i > 0 {
                dict.push_str(&format!(" /Prev {} 0 R", ids[i - 1]));
            }
            if let Some(next) = ids.get(i + 1) {
                dict.push_str(&format!(" /Next {next} 0 R"));
            }
            dict.push_str(" >>");
            self.object(ids[i], &dict)?;
        }
        let (first, last) = match (ids.first(), ids.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty outline")),
        };
        self.object(
            root,
            &format!(
                "<< /Type /Outlines /First {first} 0 R /Last {last} 0 R /Count {} >>",
                ids.len()
            ),
        )?;
        Ok(root)
    }

    fn finish(mut self, root: usize, info: usize) -> io::Result<W> {
        let xref = self.position;
        let size = self.offsets.len() + 1;
        let mut table = format!("xref\n0 {size}\n0000000000 65535 f \n");
        for (i, offset) in self.offsets.iter().copied().enumerate() {
            let offset = offset.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("pdf object {} was never written", i + 1),
                )
            })?;
            table.push_str(&format!("{offset:010} 00000 n \n"));
        }
        table.push_str(&format!(
            "trailer\n<< /Size {size} /Root {root} 0 R /Info {info} 0 R >>\nstartxref\n{xref}\n%%EOF\n"
        ));
        self.raw(table.as_bytes())?;
        self.out.flush()?;
        Ok(self.out)
    }
}
