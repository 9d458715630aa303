use chrono::NaiveDate;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

use crate::cutting::{CutTable, CUT_DATE_FORMAT};
use crate::errors::{PipelineError, Result};
use crate::models::{CuttingRecord, DifferenceRow, Observation, SeriesInput, SeriesRow};

pub const DATE_COL: &str = "date";
pub const FIELD_COL: &str = "field_id";
pub const NDVI_COL: &str = "NDVI";
pub const DIF_COL: &str = "dif_to_forelast";

const SERIES_DATE_FORMAT: &str = "%Y-%m-%d";

enum TableFormat {
    Csv,
    Parquet,
}

fn table_format(path: &Path) -> Result<TableFormat> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => Ok(TableFormat::Csv),
        Some("parquet") => Ok(TableFormat::Parquet),
        _ => Err(PipelineError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Load a CSV or Parquet table, chosen by file extension.
///
/// CSV columns are read as text and typed during conversion, so identifiers
/// such as `007` keep their leading zeros.
pub fn read_table(path: &Path) -> Result<DataFrame> {
    let df = match table_format(path)? {
        TableFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        TableFormat::Parquet => {
            let file = File::open(path).map_err(|e| PipelineError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            ParquetReader::new(file).finish()?
        }
    };
    Ok(df)
}

pub fn write_table(df: &mut DataFrame, path: &Path) -> Result<()> {
    let format = table_format(path)?;
    let mut file = File::create(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    match format {
        TableFormat::Csv => {
            CsvWriter::new(&mut file).include_header(true).finish(df)?;
        }
        TableFormat::Parquet => {
            ParquetWriter::new(file).finish(df)?;
        }
    }
    Ok(())
}

/// Fail with `MissingColumn` unless every name is present.
pub fn require_columns(df: &DataFrame, columns: &[&str], table: &str) -> Result<()> {
    for name in columns {
        if df.column(name).is_err() {
            return Err(PipelineError::MissingColumn {
                column: name.to_string(),
                table: table.to_string(),
            });
        }
    }
    Ok(())
}

/// Accepts `YYYY-MM-DD`, `DD/MM/YYYY` and ISO datetimes (time part ignored).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.split(|c: char| c == ' ' || c == 'T').next().unwrap_or(trimmed);
    [trimmed, date_part].iter().find_map(|candidate| {
        [SERIES_DATE_FORMAT, CUT_DATE_FORMAT]
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
    })
}

fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(values)
}

fn float_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df.column(name)?.strict_cast(&DataType::Float64)?;
    let values = series.f64()?.into_iter().collect();
    Ok(values)
}

fn date_values(df: &DataFrame) -> Result<Vec<NaiveDate>> {
    string_values(df, DATE_COL)?
        .into_iter()
        .enumerate()
        .map(|(row, raw)| {
            let raw = raw.unwrap_or_default();
            parse_date(&raw).ok_or(PipelineError::DateParse { row, value: raw })
        })
        .collect()
}

fn field_values(df: &DataFrame) -> Result<Vec<String>> {
    string_values(df, FIELD_COL)?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| PipelineError::InvalidValue {
                row,
                column: FIELD_COL.to_string(),
                message: "field_id is null".to_string(),
            })
        })
        .collect()
}

/// Convert an observation table (`date, field_id, NDVI`).
pub fn observations_from_df(df: &DataFrame, table: &str) -> Result<Vec<Observation>> {
    require_columns(df, &[DATE_COL, FIELD_COL, NDVI_COL], table)?;
    let dates = date_values(df)?;
    let fields = field_values(df)?;
    let ndvi = float_values(df, NDVI_COL)?;
    Ok(dates
        .into_iter()
        .zip(fields)
        .zip(ndvi)
        .map(|((date, field_id), ndvi)| Observation { date, field_id, ndvi })
        .collect())
}

/// Convert a series table; `dif_to_forelast` is optional.
///
/// Rows without an NDVI value are skipped and counted in the second
/// return value.
pub fn series_from_df(df: &DataFrame, table: &str) -> Result<(Vec<SeriesRow>, usize)> {
    require_columns(df, &[DATE_COL, FIELD_COL, NDVI_COL], table)?;
    let dates = date_values(df)?;
    let fields = field_values(df)?;
    let ndvi = float_values(df, NDVI_COL)?;
    let difs = if df.column(DIF_COL).is_ok() {
        float_values(df, DIF_COL)?
    } else {
        vec![None; df.height()]
    };

    let mut skipped = 0;
    let rows = dates
        .into_iter()
        .zip(fields)
        .zip(ndvi)
        .zip(difs)
        .filter_map(|(((date, field_id), ndvi), dif)| match ndvi {
            Some(ndvi) if ndvi.is_finite() => Some(SeriesRow {
                date,
                field_id,
                ndvi,
                dif_to_forelast: dif.filter(|d| d.is_finite()),
            }),
            _ => {
                skipped += 1;
                None
            }
        })
        .collect();
    Ok((rows, skipped))
}

pub fn has_differences(df: &DataFrame) -> bool {
    df.column(DIF_COL).is_ok()
}

/// Series table for cutting detection, plus the number of skipped rows.
///
/// With a `dif_to_forelast` column every row is kept and NDVI is not read.
/// Without it, rows lacking NDVI are skipped because no difference can be
/// computed for them.
pub fn series_input_from_df(df: &DataFrame, table: &str) -> Result<(SeriesInput, usize)> {
    if !has_differences(df) {
        let (rows, skipped) = series_from_df(df, table)?;
        return Ok((SeriesInput::NdviOnly(rows), skipped));
    }

    require_columns(df, &[DATE_COL, FIELD_COL, DIF_COL], table)?;
    let dates = date_values(df)?;
    let fields = field_values(df)?;
    let difs = float_values(df, DIF_COL)?;
    let rows = dates
        .into_iter()
        .zip(fields)
        .zip(difs)
        .map(|((date, field_id), dif)| DifferenceRow {
            date,
            field_id,
            dif_to_forelast: dif.filter(|d| d.is_finite()),
        })
        .collect();
    Ok((SeriesInput::WithDifferences(rows), 0))
}

/// Output series table: `date, field_id, NDVI, dif_to_forelast`.
pub fn series_to_df(rows: &[SeriesRow]) -> Result<DataFrame> {
    let dates: Vec<String> = rows
        .iter()
        .map(|r| r.date.format(SERIES_DATE_FORMAT).to_string())
        .collect();
    let fields: Vec<String> = rows.iter().map(|r| r.field_id.clone()).collect();
    let ndvi: Vec<f64> = rows.iter().map(|r| r.ndvi).collect();
    let difs: Vec<Option<f64>> = rows.iter().map(|r| r.dif_to_forelast).collect();
    let df = DataFrame::new(vec![
        Series::new(DATE_COL, dates),
        Series::new(FIELD_COL, fields),
        Series::new(NDVI_COL, ndvi),
        Series::new(DIF_COL, difs),
    ])?;
    Ok(df)
}

/// Cut table: `year, field_id, num_cuts, cut_1 .. cut_k`.
pub fn cut_table_to_df(table: &CutTable) -> Result<DataFrame> {
    let years: Vec<i32> = table.records.iter().map(|r| r.year).collect();
    let fields: Vec<String> = table.records.iter().map(|r| r.field_id.clone()).collect();
    let counts: Vec<u32> = table.records.iter().map(|r| r.num_cuts() as u32).collect();

    let mut columns = vec![
        Series::new("year", years),
        Series::new(FIELD_COL, fields),
        Series::new("num_cuts", counts),
    ];
    for (i, name) in table.cut_column_names().iter().enumerate() {
        columns.push(Series::new(name.as_str(), table.cut_column(i)));
    }
    Ok(DataFrame::new(columns)?)
}

/// Read back a cut table written by [`cut_table_to_df`].
pub fn cut_records_from_df(df: &DataFrame) -> Result<CutTable> {
    require_columns(df, &["year", FIELD_COL, "num_cuts"], "cutting dates")?;
    let years = df.column("year")?.strict_cast(&DataType::Int32)?;
    let counts = df.column("num_cuts")?.strict_cast(&DataType::UInt32)?;
    let fields = field_values(df)?;

    let mut cut_columns: Vec<(usize, String)> = df
        .get_columns()
        .iter()
        .filter_map(|s| {
            let name = s.name().to_string();
            let index = name.strip_prefix("cut_")?.parse::<usize>().ok()?;
            Some((index, name))
        })
        .collect();
    cut_columns.sort();
    let cut_values: Vec<Vec<Option<String>>> = cut_columns
        .iter()
        .map(|(_, name)| string_values(df, name))
        .collect::<Result<_>>()?;

    let mut records = Vec::with_capacity(df.height());
    for (row, ((year, count), field_id)) in years
        .i32()?
        .into_iter()
        .zip(counts.u32()?.into_iter())
        .zip(fields)
        .enumerate()
    {
        let year = year.ok_or_else(|| PipelineError::InvalidValue {
            row,
            column: "year".to_string(),
            message: "year is null".to_string(),
        })?;
        let mut cut_dates = Vec::new();
        for column in &cut_values {
            if let Some(raw) = column[row].as_deref().filter(|s| !s.trim().is_empty()) {
                let date = NaiveDate::parse_from_str(raw.trim(), CUT_DATE_FORMAT).map_err(|_| {
                    PipelineError::DateParse {
                        row,
                        value: raw.to_string(),
                    }
                })?;
                cut_dates.push(date);
            }
        }
        if count.map(|c| c as usize) != Some(cut_dates.len()) {
            return Err(PipelineError::InvalidValue {
                row,
                column: "num_cuts".to_string(),
                message: format!("{:?} does not match {} populated cut columns", count, cut_dates.len()),
            });
        }
        records.push(CuttingRecord {
            year,
            field_id,
            cut_dates,
        });
    }
    Ok(CutTable::new(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 6, 14).unwrap();
        assert_eq!(parse_date("2021-06-14"), Some(expected));
        assert_eq!(parse_date("14/06/2021"), Some(expected));
        assert_eq!(parse_date("2021-06-14 00:00:00"), Some(expected));
        assert_eq!(parse_date("2021-06-14T10:30:00"), Some(expected));
        assert_eq!(parse_date("June 14th"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            read_table(Path::new("observations.xlsx")),
            Err(PipelineError::UnsupportedFormat { .. })
        ));
    }
}
