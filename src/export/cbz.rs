use super::{ExportUnit, Exporter, Grouping};
use crate::MangadexError;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Comic book zip with a `ComicInfo.xml` describing the unit.
#[derive(Debug, Clone, Copy)]
pub struct CbzExporter;

impl Exporter for CbzExporter {
    fn extension(&self) -> Option<&'static str> {
        Some("cbz")
    }

    fn export(&self, unit: &ExportUnit, target: &Path) -> Result<(), MangadexError> {
        if unit.page_count() == 0 {
            return Err(MangadexError::EmptyExport(unit.name.clone()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let partial = target.with_extension("cbz.part");
        match write_cbz(unit, &partial) {
            Ok(()) => {
                fs::rename(&partial, target)?;
                debug!(target = %target.display(), pages = unit.page_count(), "cbz written");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }
}

fn write_cbz(unit: &ExportUnit, path: &Path) -> Result<(), MangadexError> {
    let mut writer = ZipWriter::new(fs::File::create(path)?);
    // pages are already compressed images
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    writer.start_file("ComicInfo.xml", FileOptions::default())?;
    writer.write_all(comic_info(unit).as_bytes())?;

    let mut buf = Vec::new();
    for (i, chapter) in unit.chapters.iter().enumerate() {
        let prefix = match unit.grouping {
            Grouping::Chapter => String::new(),
            _ => format!("{}/", ExportUnit::chapter_dir(i, &chapter.chapter)),
        };
        for page in &chapter.pages {
            let Some(name) = page.path().file_name() else {
                continue;
            };
            writer.start_file(format!("{prefix}{}", name.to_string_lossy()), options)?;
            fs::File::open(page.path())?.read_to_end(&mut buf)?;
            writer.write_all(&buf)?;
            buf.clear();
        }
    }
    writer.finish()?;
    Ok(())
}

fn comic_info(unit: &ExportUnit) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<ComicInfo xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\">\n",
    );
    let mut element = |tag: &str, value: &str| {
        xml.push_str(&format!("  <{tag}>{}</{tag}>\n", escape_xml(value)));
    };
    element("Title", &unit.name);
    element("Series", &unit.series);
    if let [only] = unit.chapters.as_slice() {
        if let Some(number) = only.chapter.chapter() {
            element("Number", number);
        }
        if let Some(volume) = only.chapter.volume() {
            element("Volume", volume);
        }
        if let Some(group) = only.chapter.groups().first() {
            element("Translator", group);
        }
        element("LanguageISO", only.chapter.language());
    } else if let Some(first) = unit.chapters.first() {
        if unit.grouping == Grouping::Volume {
            if let Some(volume) = first.chapter.volume() {
                element("Volume", volume);
            }
        }
        element("LanguageISO", first.chapter.language());
    }
    element("PageCount", &unit.page_count().to_string());
    element("Manga", "YesAndRightToLeft");
    xml.push_str("</ComicInfo>\n");
    xml
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
