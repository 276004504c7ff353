//! Office document parsing: PPTX slide text plus the office-suite PDF path.
//!
//! PPTX is OOXML, so slide text (titles, body runs, tables, speaker notes)
//! comes straight out of the archive. Page images always go through the
//! office-suite conversion to PDF and the page renderer; DOC/DOCX/PPT take
//! the same converted-PDF path for text as well.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use super::{ParserContext, ParserError, Result, pdf};
use crate::{
  blob::DocumentPrefix,
  domain::document::{ParseOutput, ParsedPage},
};

/// Parse a PPTX: slide text from the archive, page images via conversion.
pub async fn parse_pptx(
  ctx: &ParserContext<'_>,
  prefix: &DocumentPrefix,
  file_name: &str,
  bytes: &[u8],
) -> Result<ParseOutput> {
  let slide_texts = extract_slide_texts(bytes)?;

  let pdf_bytes = ctx.converter.to_pdf(file_name, bytes).await?;
  let images = ctx.converter.render_pdf_pages(&pdf_bytes).await?;
  let image_uris = upload_page_images(ctx, prefix, &images).await?;

  let page_count = slide_texts.len().max(image_uris.len());
  let mut pages = Vec::with_capacity(page_count);
  for index in 0..page_count {
    pages.push(ParsedPage {
      page_index: index,
      text: slide_texts.get(index).cloned().unwrap_or_default(),
      image_uri: image_uris.get(index).cloned(),
    });
  }

  debug!(slides = pages.len(), "PPTX parsed");
  Ok(ParseOutput::Pages(pages))
}

/// Parse DOC/DOCX/PPT: convert to PDF, then per-page stripped-stream text
/// extraction plus a rendered page image.
pub async fn parse_via_pdf(
  ctx: &ParserContext<'_>,
  prefix: &DocumentPrefix,
  file_name: &str,
  bytes: &[u8],
) -> Result<ParseOutput> {
  let pdf_bytes = ctx.converter.to_pdf(file_name, bytes).await?;

  let mut pages = pdf::extract_pages(&pdf_bytes)?;
  let images = ctx.converter.render_pdf_pages(&pdf_bytes).await?;
  let image_uris = upload_page_images(ctx, prefix, &images).await?;

  for (page, uri) in pages.iter_mut().zip(image_uris.iter()) {
    page.image_uri = Some(uri.clone());
  }

  debug!(pages = pages.len(), "Office document parsed via PDF");
  Ok(ParseOutput::Pages(pages))
}

async fn upload_page_images(
  ctx: &ParserContext<'_>,
  prefix: &DocumentPrefix,
  images: &[Vec<u8>],
) -> Result<Vec<String>> {
  let mut uris = Vec::with_capacity(images.len());
  for (index, png) in images.iter().enumerate() {
    let uri = prefix.slide_image(index);
    ctx.blob.put_bytes(&uri, png, "image/png").await?;
    uris.push(uri.to_string());
  }
  Ok(uris)
}

/// Per-slide text: body paragraphs, tables row-joined with ` | `, and
/// speaker notes prefixed `[Notes] `.
pub fn extract_slide_texts(bytes: &[u8]) -> Result<Vec<String>> {
  let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

  let mut slide_names: Vec<(u32, String)> = Vec::new();
  let mut notes_names: Vec<(u32, String)> = Vec::new();
  for name in archive.file_names() {
    if let Some(number) = member_number(name, "ppt/slides/slide") {
      slide_names.push((number, name.to_string()));
    } else if let Some(number) = member_number(name, "ppt/notesSlides/notesSlide") {
      notes_names.push((number, name.to_string()));
    }
  }
  slide_names.sort_by_key(|(number, _)| *number);

  let mut slides = Vec::with_capacity(slide_names.len());
  for (number, name) in &slide_names {
    let xml = read_member(&mut archive, name)?;
    let mut lines = slide_lines(&xml)?;

    // Speaker notes share the slide number
    if let Some((_, notes_name)) = notes_names.iter().find(|(n, _)| n == number) {
      let notes_xml = read_member(&mut archive, notes_name)?;
      for line in slide_lines(&notes_xml)? {
        lines.push(format!("[Notes] {line}"));
      }
    }

    slides.push(lines.join("\n"));
  }

  Ok(slides)
}

fn member_number(name: &str, prefix: &str) -> Option<u32> {
  name.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()
}

fn read_member(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String> {
  let mut member = archive.by_name(name)?;
  let mut xml = String::new();
  member
    .read_to_string(&mut xml)
    .map_err(|_| ParserError::Utf8(name.to_string()))?;
  Ok(xml)
}

/// Walk a slide (or notes) XML document collecting text lines.
///
/// Paragraph runs (`a:t` inside `a:p`) become one line per paragraph; table
/// rows (`a:tr`) become one line of ` | `-joined cells.
fn slide_lines(xml: &str) -> Result<Vec<String>> {
  let mut reader = Reader::from_str(xml);

  let mut lines: Vec<String> = Vec::new();
  let mut paragraph = String::new();
  let mut cell = String::new();
  let mut row_cells: Vec<String> = Vec::new();
  let mut in_text_run = false;
  let mut table_depth = 0usize;
  let mut in_cell = false;

  loop {
    match reader.read_event() {
      Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
        b"tbl" => table_depth += 1,
        b"tr" => row_cells.clear(),
        b"tc" => {
          in_cell = true;
          cell.clear();
        }
        b"p" if table_depth == 0 => paragraph.clear(),
        b"t" => in_text_run = true,
        _ => {}
      },
      Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
        b"tbl" => table_depth = table_depth.saturating_sub(1),
        b"tr" => {
          if !row_cells.is_empty() {
            lines.push(row_cells.join(" | "));
          }
        }
        b"tc" => {
          in_cell = false;
          row_cells.push(cell.trim().to_string());
        }
        b"p" if table_depth == 0 => {
          let line = paragraph.trim();
          if !line.is_empty() {
            lines.push(line.to_string());
          }
        }
        b"p" if in_cell => cell.push(' '),
        b"t" => in_text_run = false,
        _ => {}
      },
      Ok(Event::Text(ref t)) if in_text_run => {
        let text = t.unescape().unwrap_or_default();
        if in_cell {
          cell.push_str(&text);
        } else {
          paragraph.push_str(&text);
        }
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(e.into()),
      _ => {}
    }
  }

  Ok(lines)
}

fn local_name(name: &[u8]) -> &[u8] {
  match name.iter().position(|&b| b == b':') {
    Some(at) => &name[at + 1..],
    None => name,
  }
}
