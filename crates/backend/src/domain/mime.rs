//! File type detection and routing classification.
//!
//! Uploads are classified by filename extension into a closed MIME enum.
//! Unknown extensions map to [`FileKind::Other`], which is routed only to the
//! workflow track and otherwise skipped.

use serde::{Deserialize, Serialize};

/// Closed set of file types the pipeline knows how to route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
  Pdf,
  Docx,
  Doc,
  Pptx,
  Ppt,
  Text,
  Markdown,
  Csv,
  Xlsx,
  Xls,
  Png,
  Jpeg,
  Gif,
  Tiff,
  Webp,
  Mp4,
  Mov,
  Avi,
  Mkv,
  WebmVideo,
  Mp3,
  Wav,
  Flac,
  M4a,
  Webreq,
  Other,
}

impl FileKind {
  /// Classify by filename extension (case-insensitive)
  pub fn from_file_name(file_name: &str) -> Self {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
      "pdf" => Self::Pdf,
      "docx" => Self::Docx,
      "doc" => Self::Doc,
      "pptx" => Self::Pptx,
      "ppt" => Self::Ppt,
      "txt" => Self::Text,
      "md" => Self::Markdown,
      "csv" => Self::Csv,
      "xlsx" => Self::Xlsx,
      "xls" => Self::Xls,
      "png" => Self::Png,
      "jpg" | "jpeg" => Self::Jpeg,
      "gif" => Self::Gif,
      "tiff" | "tif" => Self::Tiff,
      "webp" => Self::Webp,
      "mp4" => Self::Mp4,
      "mov" => Self::Mov,
      "avi" => Self::Avi,
      "mkv" => Self::Mkv,
      "webm" => Self::WebmVideo,
      "mp3" => Self::Mp3,
      "wav" => Self::Wav,
      "flac" => Self::Flac,
      "m4a" => Self::M4a,
      "webreq" => Self::Webreq,
      _ => Self::Other,
    }
  }

  /// Classify by MIME string (inverse of [`FileKind::mime`])
  pub fn from_mime(mime: &str) -> Self {
    match mime {
      "application/pdf" => Self::Pdf,
      "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Self::Docx,
      "application/msword" => Self::Doc,
      "application/vnd.openxmlformats-officedocument.presentationml.presentation" => Self::Pptx,
      "application/vnd.ms-powerpoint" => Self::Ppt,
      "text/plain" => Self::Text,
      "text/markdown" => Self::Markdown,
      "text/csv" => Self::Csv,
      "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Self::Xlsx,
      "application/vnd.ms-excel" => Self::Xls,
      "image/png" => Self::Png,
      "image/jpeg" => Self::Jpeg,
      "image/gif" => Self::Gif,
      "image/tiff" => Self::Tiff,
      "image/webp" => Self::Webp,
      "video/mp4" => Self::Mp4,
      "video/quicktime" => Self::Mov,
      "video/x-msvideo" => Self::Avi,
      "video/x-matroska" => Self::Mkv,
      "video/webm" => Self::WebmVideo,
      "audio/mpeg" => Self::Mp3,
      "audio/wav" => Self::Wav,
      "audio/flac" => Self::Flac,
      "audio/mp4" => Self::M4a,
      "application/x-webreq" => Self::Webreq,
      _ => Self::Other,
    }
  }

  /// Canonical MIME string
  pub fn mime(&self) -> &'static str {
    match self {
      Self::Pdf => "application/pdf",
      Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
      Self::Doc => "application/msword",
      Self::Pptx => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
      Self::Ppt => "application/vnd.ms-powerpoint",
      Self::Text => "text/plain",
      Self::Markdown => "text/markdown",
      Self::Csv => "text/csv",
      Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
      Self::Xls => "application/vnd.ms-excel",
      Self::Png => "image/png",
      Self::Jpeg => "image/jpeg",
      Self::Gif => "image/gif",
      Self::Tiff => "image/tiff",
      Self::Webp => "image/webp",
      Self::Mp4 => "video/mp4",
      Self::Mov => "video/quicktime",
      Self::Avi => "video/x-msvideo",
      Self::Mkv => "video/x-matroska",
      Self::WebmVideo => "video/webm",
      Self::Mp3 => "audio/mpeg",
      Self::Wav => "audio/wav",
      Self::Flac => "audio/flac",
      Self::M4a => "audio/mp4",
      Self::Webreq => "application/x-webreq",
      Self::Other => "application/octet-stream",
    }
  }

  pub fn is_image(&self) -> bool {
    matches!(self, Self::Png | Self::Jpeg | Self::Gif | Self::Tiff | Self::Webp)
  }

  pub fn is_video(&self) -> bool {
    matches!(self, Self::Mp4 | Self::Mov | Self::Avi | Self::Mkv | Self::WebmVideo)
  }

  pub fn is_audio(&self) -> bool {
    matches!(self, Self::Mp3 | Self::Wav | Self::Flac | Self::M4a)
  }

  pub fn is_plain_text(&self) -> bool {
    matches!(self, Self::Text | Self::Markdown)
  }

  pub fn is_spreadsheet(&self) -> bool {
    matches!(self, Self::Xlsx | Self::Xls | Self::Csv)
  }

  pub fn is_office_document(&self) -> bool {
    matches!(self, Self::Pptx | Self::Ppt | Self::Docx | Self::Doc)
  }

  /// Coarse processing class carried on the workflow queue message
  pub fn processing_type(&self) -> ProcessingType {
    if *self == Self::Webreq {
      ProcessingType::Web
    } else if self.is_plain_text() || self.is_spreadsheet() {
      ProcessingType::Text
    } else if self.is_image() {
      ProcessingType::Image
    } else if self.is_video() {
      ProcessingType::Video
    } else if self.is_audio() {
      ProcessingType::Audio
    } else {
      ProcessingType::Document
    }
  }
}

/// Processing class published on the workflow queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingType {
  Document,
  Image,
  Video,
  Audio,
  Text,
  Web,
}
