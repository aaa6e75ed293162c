//! Excel processor: workbook -> sheet assets (CSV kind) -> row assets.

use std::io::Cursor;

use async_trait::async_trait;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use tracing::{info, warn};

use skein_common::{Asset, AssetCreate, AssetKind, Metadata, Result, SkeinError};

use super::{Processor, ProcessorContext};

pub struct ExcelProcessor;

pub(crate) struct SheetData {
    pub name: String,
    /// All rows, empty ones included so indices match the sheet.
    pub rows: Vec<Vec<String>>,
    /// Non-empty row count.
    pub row_count: usize,
}

#[async_trait]
impl Processor for ExcelProcessor {
    fn name(&self) -> &'static str {
        "ExcelProcessor"
    }

    fn can_process(&self, asset: &Asset) -> bool {
        asset.kind == AssetKind::Csv
            && asset
                .blob_path
                .as_deref()
                .is_some_and(|p| p.ends_with(".xlsx") || p.ends_with(".xls"))
    }

    async fn process(&self, asset: &mut Asset, ctx: &ProcessorContext) -> Result<Vec<Asset>> {
        if !self.can_process(asset) {
            return Err(SkeinError::Processing(format!(
                "Cannot process asset {} as Excel",
                asset.id
            )));
        }

        let skip_rows = ctx.options.skip_rows;
        let max_rows = ctx.options.max_rows;

        let blob_path = asset.blob_path.clone().expect("checked by can_process");
        let file_bytes = ctx.storage.get(&blob_path).await?;

        let sheets = tokio::task::spawn_blocking(move || parse_excel(&file_bytes, skip_rows))
            .await
            .map_err(|e| SkeinError::Processing(format!("Excel parse task failed: {e}")))??;

        if sheets.is_empty() {
            return Err(SkeinError::Processing("Excel file contains no data".into()));
        }

        asset.text_content = Some(format!("Excel workbook with {} sheet(s)", sheets.len()));
        asset
            .source_metadata
            .insert("sheet_count".into(), serde_json::json!(sheets.len()));
        asset.source_metadata.insert(
            "sheet_names".into(),
            serde_json::json!(sheets.iter().map(|s| s.name.clone()).collect::<Vec<_>>()),
        );
        asset.source_metadata.insert(
            "total_rows".into(),
            serde_json::json!(sheets.iter().map(|s| s.row_count).sum::<usize>()),
        );
        asset
            .source_metadata
            .insert("is_multisheet_excel".into(), serde_json::json!(true));

        let mut sheet_assets = Vec::new();
        for (sheet_index, sheet) in sheets.iter().enumerate() {
            let sheet_asset = self
                .process_sheet(asset, sheet, sheet_index, max_rows, ctx)
                .await?;
            sheet_assets.push(sheet_asset);
        }

        info!(
            asset_id = asset.id,
            sheets = sheets.len(),
            "processed Excel workbook"
        );
        Ok(sheet_assets)
    }
}

impl ExcelProcessor {
    async fn process_sheet(
        &self,
        parent: &Asset,
        sheet: &SheetData,
        sheet_index: usize,
        max_rows: usize,
        ctx: &ProcessorContext,
    ) -> Result<Asset> {
        let mut sheet_create = AssetCreate::new(
            parent.infospace_id,
            parent.user_id,
            sheet.name.clone(),
            AssetKind::Csv,
        );
        sheet_create.parent_asset_id = Some(parent.id);
        sheet_create.source_id = parent.source_id;
        sheet_create.part_index = Some(sheet_index as i32);
        sheet_create
            .source_metadata
            .insert("sheet_name".into(), serde_json::json!(sheet.name));
        sheet_create
            .source_metadata
            .insert("sheet_index".into(), serde_json::json!(sheet_index));
        sheet_create
            .source_metadata
            .insert("parent_excel_file".into(), serde_json::json!(parent.title));
        sheet_create
            .source_metadata
            .insert("row_count".into(), serde_json::json!(sheet.row_count));
        sheet_create
            .source_metadata
            .insert("is_excel_sheet".into(), serde_json::json!(true));

        let Some((header_idx, header)) = detect_header_row(&sheet.rows) else {
            warn!(sheet = %sheet.name, "no valid header row");
            return ctx.store.create_asset(sheet_create).await;
        };

        sheet_create
            .source_metadata
            .insert("header_row_index".into(), serde_json::json!(header_idx));
        sheet_create
            .source_metadata
            .insert("data_starts_at_row".into(), serde_json::json!(header_idx + 1));

        let mut row_records: Vec<(String, String, usize, Metadata)> = Vec::new();
        let mut full_text_parts = vec![
            format!("Sheet: {}", sheet.name),
            format!("Headers: {}", header.join(" | ")),
        ];
        let mut rows_processed: usize = 0;

        for row in sheet.rows.iter().skip(header_idx + 1) {
            if rows_processed >= max_rows {
                warn!(sheet = %sheet.name, max_rows, "sheet processing stopped at row limit");
                break;
            }
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }

            let mut cleaned: Vec<String> = row
                .iter()
                .take(header.len())
                .map(|cell| cell.replace('\0', "").trim().to_string())
                .collect();
            while cleaned.len() < header.len() {
                cleaned.push(String::new());
            }

            let row_data: Metadata = header
                .iter()
                .zip(cleaned.iter())
                .map(|(h, c)| (h.clone(), serde_json::Value::String(c.clone())))
                .collect();
            let row_text = cleaned.join(" | ");
            full_text_parts.push(row_text.clone());

            let mut title_parts = vec![sheet.name.clone(), (rows_processed + 1).to_string()];
            for cell in cleaned.iter().take(2).filter(|c| !c.trim().is_empty()) {
                let short: String = cell.chars().take(25).collect();
                if cell.chars().count() > 25 {
                    title_parts.push(format!("{short}..."));
                } else {
                    title_parts.push(short);
                }
            }
            let row_title = if title_parts.len() > 2 {
                title_parts.join(" | ")
            } else {
                format!("{} Row {}", sheet.name, rows_processed + 1)
            };

            row_records.push((row_title, row_text, rows_processed, row_data));
            rows_processed += 1;
        }

        sheet_create.text_content = Some(full_text_parts.join("\n"));
        sheet_create
            .source_metadata
            .insert("columns".into(), serde_json::json!(header));
        sheet_create
            .source_metadata
            .insert("column_count".into(), serde_json::json!(header.len()));
        sheet_create
            .source_metadata
            .insert("rows_processed".into(), serde_json::json!(rows_processed));

        // Sheet asset first; rows hang off the sheet, not the workbook.
        let sheet_asset = ctx.store.create_asset(sheet_create).await?;

        for (index, (title, text, part_index, row_data)) in row_records.into_iter().enumerate() {
            let mut create = AssetCreate::new(
                parent.infospace_id,
                parent.user_id,
                title,
                AssetKind::CsvRow,
            );
            create.parent_asset_id = Some(sheet_asset.id);
            create.source_id = parent.source_id;
            create.part_index = Some(part_index as i32);
            create.text_content = Some(text);
            create
                .source_metadata
                .insert("sheet_name".into(), serde_json::json!(sheet.name));
            create
                .source_metadata
                .insert("sheet_index".into(), serde_json::json!(sheet_index));
            create
                .source_metadata
                .insert("row_number".into(), serde_json::json!(part_index + 1));
            create
                .source_metadata
                .insert("data_row_index".into(), serde_json::json!(part_index));
            create.source_metadata.insert(
                "original_row_data".into(),
                serde_json::Value::Object(row_data),
            );
            create
                .source_metadata
                .insert("excel_file".into(), serde_json::json!(parent.title));
            ctx.store.create_asset(create).await?;

            if (index + 1) % 1000 == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }

        info!(
            sheet = %sheet.name,
            rows = rows_processed,
            columns = header.len(),
            "processed sheet"
        );
        Ok(sheet_asset)
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn parse_excel(file_bytes: &[u8], skip_rows: usize) -> Result<Vec<SheetData>> {
    let cursor = Cursor::new(file_bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)
        .map_err(|e| SkeinError::Processing(format!("Failed to parse Excel file: {e}")))?;

    let sheet_names = workbook.sheet_names().to_owned();
    let mut sheets = Vec::new();

    for name in sheet_names {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                warn!(sheet = %name, error = %e, "failed to read sheet");
                continue;
            }
        };

        let rows: Vec<Vec<String>> = range
            .rows()
            .skip(skip_rows)
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        let row_count = rows
            .iter()
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
            .count();

        if row_count > 0 {
            sheets.push(SheetData {
                name,
                rows,
                row_count,
            });
        }
    }

    info!(sheets = sheets.len(), "converted Excel file");
    Ok(sheets)
}

/// Find the header row in the first 20 rows.
///
/// Rows with two or fewer non-empty cells look like titles and are
/// skipped. Candidates score `non_empty_count * length_score` where the
/// length score prefers 5-30 character cells. The winner is validated
/// against the next row having at least half as many cells; otherwise the
/// runner-up is taken. Empty header cells become `Column_{n}`.
pub(crate) fn detect_header_row(rows: &[Vec<String>]) -> Option<(usize, Vec<String>)> {
    if rows.is_empty() {
        return None;
    }

    let scan_limit = rows.len().min(20);
    let mut candidates: Vec<(usize, usize, f64)> = Vec::new();

    for (idx, row) in rows.iter().take(scan_limit).enumerate() {
        let non_empty = row.iter().filter(|c| !c.trim().is_empty()).count();
        if non_empty <= 2 {
            continue;
        }
        let lengths: Vec<usize> = row
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.trim().len())
            .collect();
        let avg_length = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
        let length_score = if (5.0..=30.0).contains(&avg_length) {
            1.0
        } else {
            0.5
        };
        candidates.push((idx, non_empty, non_empty as f64 * length_score));
    }

    if candidates.is_empty() {
        return None;
    }

    candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    let (mut header_idx, cell_count, _) = candidates[0];

    if header_idx + 1 < rows.len() {
        let next_row_cells = rows[header_idx + 1]
            .iter()
            .filter(|c| !c.trim().is_empty())
            .count();
        if (next_row_cells as f64) < cell_count as f64 * 0.5 {
            warn!(
                header_idx,
                next_row_cells, cell_count, "header candidate rejected by data-row check"
            );
            if candidates.len() > 1 {
                header_idx = candidates[1].0;
            }
        }
    }

    let header = rows[header_idx]
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let trimmed = h.trim();
            if trimmed.is_empty() {
                format!("Column_{}", i + 1)
            } else {
                trimmed.to_string()
            }
        })
        .collect();

    Some((header_idx, header))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_header_after_title_and_blank_rows() {
        // Row 0 is a title, row 1 is blank, row 2 is the real header.
        let rows = vec![
            row(&["Report", "", "", ""]),
            row(&[]),
            row(&["Country", "Score", "Date"]),
            row(&["Norway", "9.1", "2024-01-02"]),
            row(&["Chile", "8.4", "2024-01-03"]),
        ];
        let (idx, header) = detect_header_row(&rows).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(header, vec!["Country", "Score", "Date"]);
    }

    #[test]
    fn test_empty_header_cells_named() {
        let rows = vec![
            row(&["A", "", "C", "D"]),
            row(&["1", "2", "3", "4"]),
        ];
        let (idx, header) = detect_header_row(&rows).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(header, vec!["A", "Column_2", "C", "D"]);
    }

    #[test]
    fn test_no_header_in_sparse_sheet() {
        let rows = vec![row(&["only", "two"]), row(&["cells", ""])];
        assert!(detect_header_row(&rows).is_none());
    }

    #[test]
    fn test_fallback_to_second_candidate() {
        // Best-scoring row is followed by a nearly empty row, so the
        // runner-up wins.
        let rows = vec![
            row(&["Alpha", "Beta", "Gamma", "Delta", "Epsilon"]),
            row(&["x", "", "", "", ""]),
            row(&["One", "Two", "Three", "Four"]),
            row(&["1", "2", "3", "4"]),
        ];
        let (idx, _) = detect_header_row(&rows).unwrap();
        assert_eq!(idx, 2);
    }
}
