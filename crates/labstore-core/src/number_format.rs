//! printf-style number formatting for text data rows and metadata values.
//!
//! Supported specifiers: `%.<p>e`, `%.<p>E`, `%.<p>f`, `%.<p>g`, `%.<p>G`,
//! `%d` and `%i`, each with an optional minimum field width (`%12.4f`).
//! Precision defaults to 6 when omitted. Exponents always carry a sign and
//! at least two digits, so `1.0` under `%.18e` becomes
//! `1.000000000000000000e+00`.

use std::fmt;
use std::str::FromStr;

use crate::error::{LabstoreError, Result};

/// The specifier applied to values when none is configured.
pub const DEFAULT_NUMBER_FORMAT: &str = "%.18e";

const DEFAULT_PRECISION: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    Scientific { precision: usize, upper: bool, width: usize },
    Fixed { precision: usize, width: usize },
    General { precision: usize, upper: bool, width: usize },
    Integer { width: usize },
}

impl NumberFormat {
    pub const fn scientific(precision: usize) -> Self {
        NumberFormat::Scientific { precision, upper: false, width: 0 }
    }

    pub const fn fixed(precision: usize) -> Self {
        NumberFormat::Fixed { precision, width: 0 }
    }

    pub fn format(&self, value: f64) -> String {
        let (text, width) = match *self {
            NumberFormat::Scientific { precision, upper, width } => {
                (format_scientific(value, precision, upper), width)
            }
            NumberFormat::Fixed { precision, width } => (format_fixed(value, precision), width),
            NumberFormat::General { precision, upper, width } => {
                (format_general(value, precision, upper), width)
            }
            NumberFormat::Integer { width } => (format_integer(value), width),
        };
        if text.len() < width {
            format!("{text:>width$}")
        } else {
            text
        }
    }
}

impl Default for NumberFormat {
    fn default() -> Self {
        NumberFormat::scientific(18)
    }
}

impl FromStr for NumberFormat {
    type Err = LabstoreError;

    fn from_str(spec: &str) -> Result<Self> {
        let invalid =
            || LabstoreError::InvalidConfig(format!("unsupported number format specifier {spec:?}"));

        let body = spec.trim().strip_prefix('%').ok_or_else(invalid)?;
        let conversion = body.chars().last().ok_or_else(invalid)?;
        let modifiers = &body[..body.len() - conversion.len_utf8()];

        let (width_str, precision_str) = match modifiers.split_once('.') {
            Some((w, p)) => (w, Some(p)),
            None => (modifiers, None),
        };
        let parse_digits = |s: &str| -> Result<usize> {
            if s.is_empty() {
                return Ok(0);
            }
            if !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse::<usize>().map_err(|_| invalid())
        };
        let width = parse_digits(width_str)?;
        let precision = match precision_str {
            Some(p) => parse_digits(p)?,
            None => DEFAULT_PRECISION,
        };

        match conversion {
            'e' | 'E' => Ok(NumberFormat::Scientific {
                precision,
                upper: conversion == 'E',
                width,
            }),
            'f' | 'F' => Ok(NumberFormat::Fixed { precision, width }),
            'g' | 'G' => Ok(NumberFormat::General {
                precision,
                upper: conversion == 'G',
                width,
            }),
            'd' | 'i' if precision_str.is_none() => Ok(NumberFormat::Integer { width }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for NumberFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = |w: usize| if w == 0 { String::new() } else { w.to_string() };
        match *self {
            NumberFormat::Scientific { precision, upper, width: w } => {
                write!(f, "%{}.{}{}", width(w), precision, if upper { 'E' } else { 'e' })
            }
            NumberFormat::Fixed { precision, width: w } => write!(f, "%{}.{}f", width(w), precision),
            NumberFormat::General { precision, upper, width: w } => {
                write!(f, "%{}.{}{}", width(w), precision, if upper { 'G' } else { 'g' })
            }
            NumberFormat::Integer { width: w } => write!(f, "%{}d", width(w)),
        }
    }
}

/// One format for every column, or one per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumberFormats {
    Uniform(NumberFormat),
    PerColumn(Vec<NumberFormat>),
}

impl NumberFormats {
    /// Fails with `FormatMismatch` when per-column formats do not cover `columns`.
    pub fn check_columns(&self, columns: usize) -> Result<()> {
        match self {
            NumberFormats::PerColumn(formats) if formats.len() != columns => {
                Err(LabstoreError::FormatMismatch {
                    expected: formats.len(),
                    found: columns,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn format_row(&self, row: &[f64], delimiter: &str) -> String {
        let cells: Vec<String> = match self {
            NumberFormats::Uniform(format) => row.iter().map(|v| format.format(*v)).collect(),
            NumberFormats::PerColumn(formats) => row
                .iter()
                .zip(formats)
                .map(|(v, format)| format.format(*v))
                .collect(),
        };
        cells.join(delimiter)
    }
}

impl Default for NumberFormats {
    fn default() -> Self {
        NumberFormats::Uniform(NumberFormat::default())
    }
}

pub fn format_scientific(value: f64, precision: usize, upper: bool) -> String {
    if !value.is_finite() {
        return format_non_finite(value);
    }
    let raw = format!("{value:.precision$e}");
    match raw.split_once('e') {
        Some((mantissa, exponent)) => join_exponent(mantissa, exponent, upper),
        None => raw.clone(),
    }
}

fn format_fixed(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return format_non_finite(value);
    }
    format!("{value:.precision$}")
}

fn format_integer(value: f64) -> String {
    if !value.is_finite() {
        return format_non_finite(value);
    }
    // `+ 0.0` turns a truncated -0.0 into 0.0
    format!("{:.0}", value.trunc() + 0.0)
}

fn format_general(value: f64, precision: usize, upper: bool) -> String {
    if !value.is_finite() {
        return format_non_finite(value);
    }
    let significant = precision.max(1);
    let raw = format!("{:.*e}", significant - 1, value);
    let Some((mantissa, exponent)) = raw.split_once('e') else {
        return raw.clone();
    };
    let exp: i32 = exponent.parse().unwrap_or(0);
    if exp < -4 || exp >= significant as i32 {
        join_exponent(strip_trailing_zeros(mantissa), exponent, upper)
    } else {
        let decimals = (significant as i32 - 1 - exp).max(0) as usize;
        strip_trailing_zeros(&format!("{value:.decimals$}")).to_string()
    }
}

fn join_exponent(mantissa: &str, exponent: &str, upper: bool) -> String {
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    let marker = if upper { 'E' } else { 'e' };
    format!("{mantissa}{marker}{sign}{digits:0>2}")
}

fn strip_trailing_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn format_non_finite(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_sign_negative() {
        "-inf".to_string()
    } else {
        "inf".to_string()
    }
}
