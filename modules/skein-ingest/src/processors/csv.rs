//! CSV processor: one CSV_ROW child per data row.

use async_trait::async_trait;
use tracing::{info, warn};

use skein_common::{Asset, AssetCreate, AssetKind, Result, SkeinError};

use super::{Processor, ProcessorContext};

const DELIMITER_CANDIDATES: [char; 4] = [',', ';', '\t', '|'];

pub struct CsvProcessor;

#[async_trait]
impl Processor for CsvProcessor {
    fn name(&self) -> &'static str {
        "CsvProcessor"
    }

    fn can_process(&self, asset: &Asset) -> bool {
        asset.kind == AssetKind::Csv
            && asset
                .blob_path
                .as_deref()
                .is_some_and(|p| !p.ends_with(".xlsx") && !p.ends_with(".xls"))
    }

    async fn process(&self, asset: &mut Asset, ctx: &ProcessorContext) -> Result<Vec<Asset>> {
        if !self.can_process(asset) {
            return Err(SkeinError::Processing(format!(
                "Cannot process asset {} as CSV",
                asset.id
            )));
        }

        let encoding = ctx
            .options
            .encoding
            .clone()
            .unwrap_or_else(|| "utf-8".to_string());
        let skip_rows = ctx.options.skip_rows;
        let max_rows = ctx.options.max_rows;

        let blob_path = asset.blob_path.clone().expect("checked by can_process");
        let file_bytes = ctx.storage.get(&blob_path).await?;

        let csv_text = decode_csv(&file_bytes, &encoding);
        let delimiter = ctx
            .options
            .delimiter
            .unwrap_or_else(|| detect_delimiter(&csv_text));

        // CPU-bound parse off the async path.
        let records = tokio::task::spawn_blocking(move || parse_records(&csv_text, delimiter))
            .await
            .map_err(|e| SkeinError::Processing(format!("CSV parse task failed: {e}")))?;

        let mut rows = records.into_iter();
        for _ in 0..skip_rows {
            if rows.next().is_none() {
                return Err(SkeinError::Processing(format!(
                    "CSV has fewer rows than skip_rows={skip_rows}"
                )));
            }
        }

        let header: Vec<String> = rows
            .next()
            .ok_or_else(|| SkeinError::Processing("CSV is empty or has no header row".into()))?
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if header.is_empty() {
            return Err(SkeinError::Processing("CSV header row is empty".into()));
        }

        let mut children = Vec::new();
        let mut full_text_parts = vec![format!("CSV Headers: {}", header.join(" | "))];
        let mut rows_processed: usize = 0;

        for row in rows {
            if rows_processed >= max_rows {
                warn!(asset_id = asset.id, max_rows, "CSV processing stopped at row limit");
                break;
            }
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }

            let cleaned = normalize_row(&row, header.len());
            let row_data: skein_common::Metadata = header
                .iter()
                .zip(cleaned.iter())
                .map(|(h, c)| (h.clone(), serde_json::Value::String(c.clone())))
                .collect();
            let row_text = cleaned.join(" | ");
            full_text_parts.push(row_text.clone());

            let row_title = row_title(rows_processed + 1, &cleaned);

            let mut create = AssetCreate::new(
                asset.infospace_id,
                asset.user_id,
                row_title,
                AssetKind::CsvRow,
            );
            create.parent_asset_id = Some(asset.id);
            create.source_id = asset.source_id;
            create.part_index = Some(rows_processed as i32);
            create.text_content = Some(row_text);
            create.source_metadata.insert(
                "row_number".into(),
                serde_json::json!(skip_rows + rows_processed + 2),
            );
            create
                .source_metadata
                .insert("data_row_index".into(), serde_json::json!(rows_processed));
            create.source_metadata.insert(
                "original_row_data".into(),
                serde_json::Value::Object(row_data),
            );

            children.push(ctx.store.create_asset(create).await?);
            rows_processed += 1;

            if rows_processed % 1000 == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }

        asset.text_content = Some(full_text_parts.join("\n"));
        asset
            .source_metadata
            .insert("columns".into(), serde_json::json!(header));
        asset.source_metadata.insert(
            "delimiter_used".into(),
            serde_json::json!(delimiter.to_string()),
        );
        asset
            .source_metadata
            .insert("encoding_used".into(), serde_json::json!(encoding));
        asset
            .source_metadata
            .insert("rows_processed".into(), serde_json::json!(rows_processed));
        asset
            .source_metadata
            .insert("column_count".into(), serde_json::json!(header.len()));

        info!(
            asset_id = asset.id,
            rows = rows_processed,
            columns = header.len(),
            "processed CSV"
        );
        Ok(children)
    }
}

/// Decode with the requested encoding, replacing malformed sequences.
/// latin1 and cp1252 decode byte-for-byte; everything else goes through
/// lossy UTF-8.
pub(crate) fn decode_csv(file_bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "latin1" | "iso-8859-1" | "cp1252" | "windows-1252" => {
            file_bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(file_bytes).into_owned(),
    }
}

pub(crate) fn parse_records(csv_text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(csv_text.as_bytes());
    reader
        .records()
        .filter_map(|r| r.ok())
        .map(|record| record.iter().map(|cell| cell.to_string()).collect())
        .collect()
}

pub(crate) fn normalize_row(row: &[String], width: usize) -> Vec<String> {
    let mut cleaned: Vec<String> = row
        .iter()
        .take(width)
        .map(|cell| cell.replace('\0', "").trim().to_string())
        .collect();
    while cleaned.len() < width {
        cleaned.push(String::new());
    }
    cleaned
}

/// `{n} | {first 3 non-empty cells truncated to 25 chars}`, or `Row {n}`.
pub(crate) fn row_title(row_number: usize, cells: &[String]) -> String {
    let mut parts = vec![row_number.to_string()];
    for cell in cells.iter().take(3).filter(|c| !c.trim().is_empty()) {
        let short: String = cell.chars().take(25).collect();
        if cell.chars().count() > 25 {
            parts.push(format!("{short}..."));
        } else {
            parts.push(short);
        }
    }
    if parts.len() > 1 {
        parts.join(" | ")
    } else {
        format!("Row {row_number}")
    }
}

fn field_counts(lines: &[&str], delimiter: char) -> Vec<usize> {
    let sample = lines.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(sample.as_bytes());
    reader
        .records()
        .filter_map(|r| r.ok())
        .filter(|r| !r.is_empty())
        .map(|r| r.len())
        .collect()
}

/// Two-stage delimiter detection.
///
/// Stage 1 mimics a sniffer: a candidate whose raw occurrence count is
/// equal and non-zero across the sample wins, validated by field-count
/// variance over five parsed rows. Stage 2 scores every candidate with
/// `consistency * 0.7 + min(avg/10, 1) * 0.3`, requiring more than one
/// field per row. Default is `,`.
pub(crate) fn detect_delimiter(csv_text: &str) -> char {
    let lines: Vec<&str> = csv_text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(20)
        .collect();

    if lines.len() < 2 {
        return ',';
    }

    // Stage 1: occurrence-count sniff on up to 10 lines.
    let sniff_lines = &lines[..lines.len().min(10)];
    let mut sniffed: Option<(char, usize)> = None;
    for candidate in DELIMITER_CANDIDATES {
        let counts: Vec<usize> = sniff_lines
            .iter()
            .map(|l| l.matches(candidate).count())
            .collect();
        let first = counts[0];
        if first >= 1 && counts.iter().all(|&c| c == first) {
            match sniffed {
                Some((_, best)) if best >= first => {}
                _ => sniffed = Some((candidate, first)),
            }
        }
    }
    if let Some((candidate, _)) = sniffed {
        let validate = &lines[..lines.len().min(5)];
        let counts = field_counts(validate, candidate);
        if counts.len() >= 2 {
            let max = *counts.iter().max().expect("non-empty");
            let min = *counts.iter().min().expect("non-empty");
            let avg = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
            if avg > 1.0 && (max - min) as f64 <= (avg * 0.2).max(2.0) {
                return candidate;
            }
        }
    }

    // Stage 2: scored fallback.
    let score_lines = &lines[..lines.len().min(10)];
    let mut best_delimiter = ',';
    let mut best_score = 0.0_f64;
    for candidate in DELIMITER_CANDIDATES {
        let counts = field_counts(score_lines, candidate);
        if counts.len() < 2 {
            continue;
        }
        let max = *counts.iter().max().expect("non-empty");
        let min = *counts.iter().min().expect("non-empty");
        let avg = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
        let consistency = 1.0 / (1.0 + (max - min) as f64);
        let score = consistency * 0.7 + (avg / 10.0).min(1.0) * 0.3;
        if score > best_score && avg > 1.0 {
            best_score = score;
            best_delimiter = candidate;
        }
    }

    best_delimiter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::IngestOptions;
    use crate::processors::ProcessorContext;
    use std::sync::Arc;
    use skein_store::{BlobStorage, MemoryStorage, MemoryStore, Store};

    fn context(options: IngestOptions) -> (ProcessorContext, Arc<MemoryStore>, Arc<MemoryStorage>) {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let ctx = ProcessorContext {
            store: store.clone(),
            storage: storage.clone(),
            scraper: None,
            options,
        };
        (ctx, store, storage)
    }

    async fn csv_parent(store: &MemoryStore, path: &str) -> Asset {
        let mut create = AssetCreate::new(1, 1, "people.csv", AssetKind::Csv);
        create.blob_path = Some(path.to_string());
        store.create_asset(create).await.unwrap()
    }

    #[tokio::test]
    async fn test_people_csv() {
        let (ctx, store, storage) = context(IngestOptions::default());
        storage
            .upload("user_1/people.csv", b"name,age\nAda,36\nGrace,85\n")
            .await
            .unwrap();
        let mut parent = csv_parent(&store, "user_1/people.csv").await;

        let children = CsvProcessor.process(&mut parent, &ctx).await.unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].text_content.as_deref(), Some("Ada | 36"));
        assert_eq!(children[1].text_content.as_deref(), Some("Grace | 85"));
        assert_eq!(children[0].part_index, Some(0));
        assert_eq!(children[1].part_index, Some(1));
        assert_eq!(children[0].parent_asset_id, Some(parent.id));

        assert_eq!(
            parent.source_metadata["columns"],
            serde_json::json!(["name", "age"])
        );
        assert_eq!(parent.source_metadata["delimiter_used"], ",");
        assert_eq!(parent.source_metadata["rows_processed"], 2);
        assert!(parent
            .text_content
            .as_deref()
            .unwrap()
            .starts_with("CSV Headers: name | age"));
    }

    #[tokio::test]
    async fn test_skip_rows_beyond_content() {
        let mut options = IngestOptions::default();
        options.skip_rows = 10;
        let (ctx, store, storage) = context(options);
        storage
            .upload("user_1/tiny.csv", b"a,b\n1,2\n")
            .await
            .unwrap();
        let mut parent = csv_parent(&store, "user_1/tiny.csv").await;

        let err = CsvProcessor.process(&mut parent, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("fewer rows than skip_rows=10"));
    }

    #[tokio::test]
    async fn test_rows_padded_and_truncated() {
        let (ctx, store, storage) = context(IngestOptions::default());
        storage
            .upload("user_1/ragged.csv", b"a,b,c\n1,2\n1,2,3,4\n")
            .await
            .unwrap();
        let mut parent = csv_parent(&store, "user_1/ragged.csv").await;

        let children = CsvProcessor.process(&mut parent, &ctx).await.unwrap();
        assert_eq!(children[0].text_content.as_deref(), Some("1 | 2 | "));
        assert_eq!(children[1].text_content.as_deref(), Some("1 | 2 | 3"));
    }

    #[test]
    fn test_detect_comma() {
        assert_eq!(detect_delimiter("a,b,c\n1,2,3\n4,5,6\n"), ',');
    }

    #[test]
    fn test_detect_semicolon() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3\n4;5;6\n"), ';');
    }

    #[test]
    fn test_detect_tab() {
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3\n"), '\t');
    }

    #[test]
    fn test_detect_single_column_defaults_to_comma() {
        assert_eq!(detect_delimiter("name\nAda\nGrace\n"), ',');
    }

    #[test]
    fn test_detect_short_input() {
        assert_eq!(detect_delimiter("only one line"), ',');
    }

    #[test]
    fn test_row_title_shapes() {
        assert_eq!(
            row_title(1, &["Ada".into(), "36".into()]),
            "1 | Ada | 36"
        );
        assert_eq!(row_title(4, &["".into(), "".into()]), "Row 4");
        let long = "x".repeat(30);
        let title = row_title(2, &[long]);
        assert!(title.ends_with("..."));
    }
}
