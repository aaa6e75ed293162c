//! PDF processor: page-level text extraction into PDF_PAGE children.

use async_trait::async_trait;
use lopdf::{Document, Object};
use tracing::{info, warn};

use skein_common::{Asset, AssetCreate, AssetKind, Result, SkeinError};

use super::{Processor, ProcessorContext};

pub struct PdfProcessor;

pub(crate) struct PdfExtract {
    /// (1-based page number, extracted text) for non-empty pages.
    pub pages: Vec<(usize, String)>,
    pub page_count: usize,
    pub title: Option<String>,
}

#[async_trait]
impl Processor for PdfProcessor {
    fn name(&self) -> &'static str {
        "PdfProcessor"
    }

    fn can_process(&self, asset: &Asset) -> bool {
        asset.kind == AssetKind::Pdf && asset.blob_path.is_some()
    }

    async fn process(&self, asset: &mut Asset, ctx: &ProcessorContext) -> Result<Vec<Asset>> {
        if !self.can_process(asset) {
            return Err(SkeinError::Processing(format!(
                "Cannot process asset {} as PDF",
                asset.id
            )));
        }

        let max_pages = ctx.options.max_pages;
        let blob_path = asset.blob_path.clone().expect("checked by can_process");
        let pdf_bytes = ctx.storage.get(&blob_path).await?;

        let extract = tokio::task::spawn_blocking(move || extract_pdf(&pdf_bytes, max_pages))
            .await
            .map_err(|e| SkeinError::Processing(format!("PDF parse task failed: {e}")))??;

        let mut full_text = String::new();
        let mut children = Vec::new();

        for (page_number, text) in &extract.pages {
            full_text.push_str(text);
            full_text.push_str("\n\n");

            let mut create = AssetCreate::new(
                asset.infospace_id,
                asset.user_id,
                format!("Page {page_number}"),
                AssetKind::PdfPage,
            );
            create.parent_asset_id = Some(asset.id);
            create.source_id = asset.source_id;
            create.part_index = Some((page_number - 1) as i32);
            create.text_content = Some(text.clone());
            create
                .source_metadata
                .insert("page_number".into(), serde_json::json!(page_number));
            create
                .source_metadata
                .insert("char_count".into(), serde_json::json!(text.len()));
            children.push(ctx.store.create_asset(create).await?);
        }

        asset.text_content = Some(full_text.trim().to_string());
        if let Some(extracted_title) = &extract.title {
            if asset.title.starts_with("Uploaded") {
                asset.title = extracted_title.clone();
            }
        }
        asset
            .source_metadata
            .insert("page_count".into(), serde_json::json!(extract.page_count));
        asset
            .source_metadata
            .insert("processed_pages".into(), serde_json::json!(children.len()));
        if let Some(title) = &extract.title {
            asset
                .source_metadata
                .insert("extracted_title".into(), serde_json::json!(title));
        }

        info!(
            asset_id = asset.id,
            pages = children.len(),
            page_count = extract.page_count,
            "processed PDF"
        );
        Ok(children)
    }
}

pub(crate) fn extract_pdf(pdf_bytes: &[u8], max_pages: usize) -> Result<PdfExtract> {
    let doc = Document::load_mem(pdf_bytes)
        .map_err(|e| SkeinError::Processing(format!("Failed to open PDF: {e}")))?;

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let page_count = page_numbers.len();
    let title = pdf_title(&doc);

    let mut pages = Vec::new();
    for page_number in page_numbers.into_iter().take(max_pages) {
        let text = match doc.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                warn!(page = page_number, error = %e, "error extracting PDF page");
                continue;
            }
        };
        let text = text.replace('\0', "");
        let text = text.trim();
        if !text.is_empty() {
            pages.push((page_number as usize, text.to_string()));
        }
    }

    Ok(PdfExtract {
        pages,
        page_count,
        title,
    })
}

/// Title from the document Info dictionary, if any.
fn pdf_title(doc: &Document) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let info_dict = match info {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match info_dict.get(b"Title").ok()? {
        Object::String(bytes, _) => {
            let decoded = decode_pdf_string(bytes);
            let trimmed = decoded.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

/// PDF text strings are UTF-16BE when BOM-prefixed, PDFDocEncoding
/// (close enough to latin1) otherwise.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pdf_string_utf16() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "Report".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode_pdf_string(&bytes), "Report");
    }

    #[test]
    fn test_decode_pdf_string_latin1() {
        assert_eq!(decode_pdf_string(b"Caf\xe9"), "Café");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(extract_pdf(b"not a pdf", 1000).is_err());
    }
}
