//! Row transformers applied to each batch before insertion.
//!
//! Grounded on `utils/db_transformers.py`: pure functions, no state crosses
//! batches. `transform_batch` dispatches by table name exactly as the
//! Python original's `transform_batch` does.

use chrono::NaiveDate;
use cnpj_core::{Row, RowBatch};

/// Strips `0x00`, trims surrounding whitespace, then re-encodes each string
/// field through the target 8-bit encoding with lossy replacement of
/// uncoercible characters. Non-string (already-`None`) fields untouched.
pub fn sanitize(rows: &mut [Row]) {
    for row in rows.iter_mut() {
        for field in row.iter_mut() {
            if let Some(value) = field {
                let cleaned = value.replace('\0', "");
                let trimmed = cleaned.trim();
                // Round-trip through windows-1252 so no byte outside the
                // target database's encoding ever reaches storage.
                let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode(trimmed);
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
                *value = decoded.into_owned();
            }
        }
    }
}

/// Converts Brazilian-locale decimals (`1.234,56`) to period-decimal form
/// (`1234.56`) for the named columns only, leaving non-numeric-looking
/// strings untouched.
pub fn normalize_numeric_br(rows: &mut [Row], columns: &[&str], target_columns: &[&str]) {
    let indices: Vec<usize> =
        columns.iter().enumerate().filter(|(_, c)| target_columns.contains(c)).map(|(i, _)| i).collect();

    for row in rows.iter_mut() {
        for &i in &indices {
            let Some(Some(value)) = row.get(i) else { continue };
            if value.contains(',') && value.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.') {
                row[i] = Some(value.replace('.', "").replace(',', "."));
            }
        }
    }
}

/// Normalizes the named date columns: `""`, `" "`, `"0"`, `"00000000"`
/// become `None`; an 8-digit numeric string parses as `YYYYMMDD`, with any
/// parse failure also becoming `None`; any other format is left as-is
/// (documented open edge, per the original).
pub fn normalize_dates(rows: &mut [Row], columns: &[&str], target_columns: &[&str]) {
    let indices: Vec<usize> =
        columns.iter().enumerate().filter(|(_, c)| target_columns.contains(c)).map(|(i, _)| i).collect();

    for row in rows.iter_mut() {
        for &i in &indices {
            let Some(field) = row.get_mut(i) else { continue };
            let Some(value) = field else { continue };
            let trimmed = value.trim();
            if matches!(trimmed, "00000000" | "" | " " | "0") {
                *field = None;
            } else if trimmed.len() == 8 && trimmed.chars().all(|c| c.is_ascii_digit()) {
                *field = match NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
                    Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
                    Err(_) => None,
                };
            }
            // Anything else (e.g. already-ISO dates) is passed through.
        }
    }
}

/// Applies every transform relevant to `batch.table`, matching
/// `transform_batch`'s table dispatch in the Python original.
pub fn transform_batch(mut batch: RowBatch, columns: &[&str]) -> RowBatch {
    sanitize(&mut batch.rows);

    match batch.table.as_str() {
        "empresa" => normalize_numeric_br(&mut batch.rows, columns, &["capital_social"]),
        "estabelecimento" => normalize_dates(
            &mut batch.rows,
            columns,
            &["data_situacao_cadastral", "data_inicio_atividade", "data_situacao_especial"],
        ),
        "simples" => normalize_dates(
            &mut batch.rows,
            columns,
            &["data_opcao_simples", "data_exclusao_simples", "data_opcao_mei", "data_exclusao_mei"],
        ),
        "socio" => normalize_dates(&mut batch.rows, columns, &["data_entrada_sociedade"]),
        _ => {}
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[Option<&str>]) -> Row {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn sanitize_strips_null_byte_and_trims() {
        let mut rows = vec![row(&[Some("  ACME\0 CORP  ")])];
        sanitize(&mut rows);
        assert_eq!(rows[0][0], Some("ACME CORP".to_string()));
    }

    #[test]
    fn sanitize_leaves_none_fields_alone() {
        let mut rows = vec![row(&[None])];
        sanitize(&mut rows);
        assert_eq!(rows[0][0], None);
    }

    #[test]
    fn numeric_br_converts_comma_decimal() {
        let columns = ["capital_social"];
        let mut rows = vec![row(&[Some("1.234.567,89")])];
        normalize_numeric_br(&mut rows, &columns, &["capital_social"]);
        assert_eq!(rows[0][0], Some("1234567.89".to_string()));
    }

    #[test]
    fn numeric_br_ignores_values_without_comma() {
        let columns = ["capital_social"];
        let mut rows = vec![row(&[Some("1234567")])];
        normalize_numeric_br(&mut rows, &columns, &["capital_social"]);
        assert_eq!(rows[0][0], Some("1234567".to_string()));
    }

    #[test]
    fn date_normalization_handles_placeholders_and_valid_dates() {
        let columns = ["data_situacao_cadastral"];
        let mut rows = vec![
            row(&[Some("20210731")]),
            row(&[Some("00000000")]),
            row(&[Some("")]),
            row(&[Some("2021-07-31")]), // left as-is: open edge
        ];
        normalize_dates(&mut rows, &columns, &["data_situacao_cadastral"]);
        assert_eq!(rows[0][0], Some("2021-07-31".to_string()));
        assert_eq!(rows[1][0], None);
        assert_eq!(rows[2][0], None);
        assert_eq!(rows[3][0], Some("2021-07-31".to_string()));
    }

    #[test]
    fn date_normalization_nulls_out_unparseable_eight_digit_strings() {
        let columns = ["data_entrada_sociedade"];
        let mut rows = vec![row(&[Some("20211399")])]; // month 13 is invalid
        normalize_dates(&mut rows, &columns, &["data_entrada_sociedade"]);
        assert_eq!(rows[0][0], None);
    }

    #[test]
    fn transform_batch_dispatches_by_table_name() {
        let columns = ["cnpj_basico", "capital_social"];
        let mut batch = RowBatch::new("empresa");
        batch.rows = vec![row(&[Some("12345678"), Some("1.000,50")])];
        let batch = transform_batch(batch, &columns);
        assert_eq!(batch.rows[0][1], Some("1000.50".to_string()));
    }

    #[test]
    fn derived_table_gets_only_sanitization() {
        let columns = ["cnpj_basico", "cnpj_ordem", "cnpj_dv", "cod_cnae"];
        let mut batch = RowBatch::new("estabelecimento_cnae_sec");
        batch.rows = vec![row(&[Some("12345678\0"), Some("0001"), Some("99"), Some(" 6201501 ")])];
        let batch = transform_batch(batch, &columns);
        assert_eq!(batch.rows[0][0], Some("12345678".to_string()));
        assert_eq!(batch.rows[0][3], Some("6201501".to_string()));
    }
}
