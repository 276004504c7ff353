//! Spreadsheet parsing: one markdown-table chunk per sheet.
//!
//! XLSX is read straight from the OOXML archive (shared strings + worksheet
//! cells); legacy XLS goes through the office-suite conversion to XLSX
//! first; CSV is a single sheet. Empty rows are skipped and cells are
//! sanitized so the markdown table stays well-formed.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use super::{ParserContext, ParserError, Result};
use crate::domain::{
  document::{ParseOutput, ParsedChunk},
  mime::FileKind,
};

pub async fn parse_spreadsheet(
  ctx: &ParserContext<'_>,
  kind: FileKind,
  file_name: &str,
  bytes: &[u8],
) -> Result<ParseOutput> {
  let sheets = match kind {
    FileKind::Csv => vec![("Sheet1".to_string(), parse_csv(bytes)?)],
    FileKind::Xlsx => parse_xlsx(bytes)?,
    FileKind::Xls => {
      let converted = ctx.converter.to_xlsx(file_name, bytes).await?;
      parse_xlsx(&converted)?
    }
    other => return Err(ParserError::Unsupported(other.mime().to_string())),
  };

  let mut chunks = Vec::new();
  for (name, rows) in sheets {
    let text = sheet_to_markdown(&name, &rows);
    chunks.push(ParsedChunk {
      chunk_index: chunks.len(),
      text,
    });
  }

  debug!(sheet_count = chunks.len(), "Spreadsheet parsed");
  Ok(ParseOutput::Chunks(chunks))
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<Vec<String>>> {
  let mut reader = csv::ReaderBuilder::new()
    .has_headers(false)
    .flexible(true)
    .from_reader(bytes);

  let mut rows = Vec::new();
  for record in reader.records() {
    let record = record?;
    rows.push(record.iter().map(str::to_string).collect());
  }
  Ok(rows)
}

/// Render one sheet as a markdown table headed by the sheet name.
///
/// The first non-empty row becomes the header row.
fn sheet_to_markdown(name: &str, rows: &[Vec<String>]) -> String {
  let mut lines = vec![format!("## Sheet: {name}"), String::new()];

  let non_empty: Vec<&Vec<String>> = rows
    .iter()
    .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
    .collect();

  let Some(header) = non_empty.first() else {
    return lines.join("\n");
  };

  let render_row = |row: &[String]| {
    let cells: Vec<String> = row.iter().map(|cell| sanitize_cell(cell)).collect();
    format!("| {} |", cells.join(" | "))
  };

  lines.push(render_row(header));
  lines.push(format!("| {} |", vec!["---"; header.len()].join(" | ")));
  for row in &non_empty[1..] {
    lines.push(render_row(row));
  }

  lines.join("\n")
}

fn sanitize_cell(cell: &str) -> String {
  cell.replace(['\n', '\r'], " ").replace('|', "\\|").trim().to_string()
}

/// Sheets in workbook order: `(name, rows)`
fn parse_xlsx(bytes: &[u8]) -> Result<Vec<(String, Vec<Vec<String>>)>> {
  let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

  let shared_strings = match read_member(&mut archive, "xl/sharedStrings.xml")? {
    Some(xml) => parse_shared_strings(&xml)?,
    None => Vec::new(),
  };

  let names = match read_member(&mut archive, "xl/workbook.xml")? {
    Some(xml) => parse_sheet_names(&xml)?,
    None => Vec::new(),
  };

  let mut sheets = Vec::new();
  for (index, name) in names.iter().enumerate() {
    let member = format!("xl/worksheets/sheet{}.xml", index + 1);
    let Some(xml) = read_member(&mut archive, &member)? else {
      continue;
    };
    sheets.push((name.clone(), parse_worksheet(&xml, &shared_strings)?));
  }

  Ok(sheets)
}

fn read_member(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<String>> {
  match archive.by_name(name) {
    Ok(mut member) => {
      let mut xml = String::new();
      member
        .read_to_string(&mut xml)
        .map_err(|_| ParserError::Utf8(name.to_string()))?;
      Ok(Some(xml))
    }
    Err(zip::result::ZipError::FileNotFound) => Ok(None),
    Err(e) => Err(e.into()),
  }
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
  let mut reader = Reader::from_str(xml);
  let mut strings = Vec::new();
  let mut current = String::new();
  let mut in_item = false;
  let mut in_text = false;

  loop {
    match reader.read_event() {
      Ok(Event::Start(ref e)) => match e.name().as_ref() {
        b"si" => {
          in_item = true;
          current.clear();
        }
        b"t" if in_item => in_text = true,
        _ => {}
      },
      Ok(Event::End(ref e)) => match e.name().as_ref() {
        b"si" => {
          in_item = false;
          strings.push(current.clone());
        }
        b"t" => in_text = false,
        _ => {}
      },
      Ok(Event::Text(ref t)) if in_text => current.push_str(&t.unescape().unwrap_or_default()),
      Ok(Event::Eof) => break,
      Err(e) => return Err(e.into()),
      _ => {}
    }
  }

  Ok(strings)
}

fn parse_sheet_names(xml: &str) -> Result<Vec<String>> {
  let mut reader = Reader::from_str(xml);
  let mut names = Vec::new();

  loop {
    match reader.read_event() {
      Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
        if e.name().as_ref() == b"sheet"
          && let Ok(Some(attr)) = e.try_get_attribute("name")
        {
          names.push(String::from_utf8_lossy(&attr.value).into_owned());
        }
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(e.into()),
      _ => {}
    }
  }

  Ok(names)
}

fn parse_worksheet(xml: &str, shared_strings: &[String]) -> Result<Vec<Vec<String>>> {
  let mut reader = Reader::from_str(xml);
  let mut rows: Vec<Vec<String>> = Vec::new();
  let mut row: Vec<String> = Vec::new();
  let mut in_row = false;
  let mut cell_type = String::new();
  let mut cell_value = String::new();
  let mut in_value = false;
  let mut in_inline_text = false;

  loop {
    match reader.read_event() {
      Ok(Event::Start(ref e)) => match e.name().as_ref() {
        b"row" => {
          in_row = true;
          row.clear();
        }
        b"c" if in_row => {
          cell_value.clear();
          cell_type = e
            .try_get_attribute("t")
            .ok()
            .flatten()
            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
            .unwrap_or_default();
        }
        b"v" => in_value = true,
        b"t" => in_inline_text = true,
        _ => {}
      },
      Ok(Event::Empty(ref e)) => {
        if e.name().as_ref() == b"c" && in_row {
          row.push(String::new());
        }
      }
      Ok(Event::End(ref e)) => match e.name().as_ref() {
        b"row" => {
          in_row = false;
          rows.push(std::mem::take(&mut row));
        }
        b"c" if in_row => {
          let resolved = if cell_type == "s" {
            cell_value
              .trim()
              .parse::<usize>()
              .ok()
              .and_then(|index| shared_strings.get(index))
              .cloned()
              .unwrap_or_default()
          } else {
            cell_value.clone()
          };
          row.push(resolved);
        }
        b"v" => in_value = false,
        b"t" => in_inline_text = false,
        _ => {}
      },
      Ok(Event::Text(ref t)) if in_value || in_inline_text => {
        cell_value.push_str(&t.unescape().unwrap_or_default());
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(e.into()),
      _ => {}
    }
  }

  Ok(rows)
}
