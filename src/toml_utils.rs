//! Helper functions to [`toml_span`].

use std::borrow::Cow;

use clap::ValueEnum;
use toml_span::DeserError;

/// Deserialize a TOML string into a value of the specified type.
pub fn from_toml_str<'de, T>(toml_str: &'de str) -> Result<T, DeserError>
where
    T: toml_span::Deserialize<'de>,
{
    let mut value = toml_span::de::parse(toml_str)?;
    T::deserialize(&mut value)
}

/// Create a custom [`DeserError`] with a span.
pub fn custom_deser_error(
    span: toml_span::Span,
    msg: impl Into<Cow<'static, str>>,
) -> DeserError {
    let err_kind = toml_span::ErrorKind::Custom(msg.into());
    let err = toml_span::Error::from((err_kind, span));
    DeserError::from(err)
}

/// Deserialize a string naming one of the values of a [`ValueEnum`], using
/// the same names that the command line accepts.
pub fn deserialize_value_enum<T>(
    value: &mut toml_span::Value<'_>,
) -> Result<T, DeserError>
where
    T: ValueEnum,
{
    let span = value.span;
    let name = value.take_string(None)?;
    T::from_str(&name, false).map_err(|_| {
        let expected = T::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_owned())
            .collect::<Vec<_>>()
            .join(", ");
        custom_deser_error(
            span,
            format!("unknown value {:?} (expected one of: {})", name, expected),
        )
    })
}

/// Render every error in a [`DeserError`] as `line:column: message`, one per
/// line.
pub fn describe_deser_error(source: &str, err: &DeserError) -> String {
    err.errors
        .iter()
        .map(|err| {
            let (line, column) = line_and_column(source, err.span.start);
            format!("{}:{}: {}", line, column, err)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert a byte offset into a 1-based line and column.
fn line_and_column(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map_or(before.len(), |newline| before.len() - newline - 1)
        + 1;
    (line, column)
}
