//! Decomposition of a raw query string into its reserved directives and the
//! predicate fragment.
//!
//! `fields=Hosts/state,metrics/cpu[1400000000,1400003600,60]&page_size=10&Hosts/cpu_count>4`
//! requests two fields (the second with a time range), a page of ten and a filter.

use crate::error::{QueryError, Result};
use crate::lexer::tokenize;
use crate::parser::Parser;
use crate::predicate::Predicate;
use crate::property::TemporalInfo;
use crate::query::{PageRequest, Query, SortOrder, SortRequest};
use tracing::debug;

/// Page size used when only an offset is given.
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRequest {
    pub path: String,
    pub temporal: Option<TemporalInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub fields: Vec<FieldRequest>,
    pub predicate: Option<Predicate>,
    pub page: Option<PageRequest>,
    pub sort: Option<(String, SortOrder)>,
    pub minimal: bool,
    pub format: Option<String>,
}

impl QueryParams {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let mut params = QueryParams::default();
        let mut page_size = None;
        let mut offset = None;

        for segment in raw.split('&') {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            match key {
                "fields" => params.fields.extend(parse_fields(value)?),
                "page_size" => page_size = Some(parse_number(key, value)?),
                "from" => {
                    offset = Some(if value == "start" { 0 } else { parse_number(key, value)? });
                }
                "to" => debug!(value, "ignoring unsupported 'to' paging directive"),
                "sortBy" => params.sort = parse_sort(value),
                "minimal_response" => params.minimal = value.eq_ignore_ascii_case("true"),
                "format" => params.format = Some(value.to_string()),
                _ => {}
            }
        }

        if page_size.is_some() || offset.is_some() {
            params.page = Some(PageRequest {
                offset: offset.unwrap_or(0),
                page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            });
        }

        let tokens = tokenize(raw)?;
        params.predicate = Parser::new(&tokens).parse()?;
        Ok(params)
    }

    /// Adds the requested fields, predicate, paging, sorting and minimal flag to `query`.
    pub fn apply(&self, query: &mut Query) -> Result<()> {
        query.set_minimal(self.minimal);
        for field in &self.fields {
            query.add_property(&field.path, field.temporal)?;
        }
        query.set_user_predicate(self.predicate.clone())?;
        query.set_page_request(self.page);

        if let Some((path, order)) = &self.sort {
            let property = query.schema().resolve_path(path);
            if !query.schema().is_supported(&property) {
                return Err(QueryError::UnsupportedProperty(format!("cannot sort by {}", path)));
            }
            query.set_sort_request(Some(SortRequest { property, order: *order }));
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| {
        QueryError::invalid(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

/// Splits on commas outside `[...]` time ranges.
fn parse_fields(value: &str) -> Result<Vec<FieldRequest>> {
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                fields.extend(parse_field(&value[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.extend(parse_field(&value[start..])?);
    Ok(fields)
}

fn parse_field(field: &str) -> Result<Option<FieldRequest>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }

    let Some((path, range)) = field.split_once('[') else {
        return Ok(Some(FieldRequest { path: field.to_string(), temporal: None }));
    };
    let range = range.strip_suffix(']').ok_or_else(|| {
        QueryError::invalid(format!("unterminated time range in field '{}'", field))
    })?;

    let mut parts = range.split(',').map(str::trim);
    let mut bound = |name: &str| -> Result<Option<i64>> {
        match parts.next().filter(|p| !p.is_empty()) {
            None => Ok(None),
            Some(p) => p.parse().map(Some).map_err(|_| {
                QueryError::invalid(format!("invalid {} '{}' in field '{}'", name, p, field))
            }),
        }
    };
    let start = bound("start")?.ok_or_else(|| {
        QueryError::invalid(format!("time range of field '{}' has no start", field))
    })?;
    let end = bound("end")?;
    let step = bound("step")?;

    Ok(Some(FieldRequest {
        path: path.to_string(),
        temporal: Some(TemporalInfo::new(start, end, step)),
    }))
}

/// `prop.desc,other.asc`; the first entry wins.
fn parse_sort(value: &str) -> Option<(String, SortOrder)> {
    let first = value.split(',').map(str::trim).find(|s| !s.is_empty())?;
    let parsed = if let Some(path) = first.strip_suffix(".desc") {
        (path.to_string(), SortOrder::Desc)
    } else {
        (first.strip_suffix(".asc").unwrap_or(first).to_string(), SortOrder::Asc)
    };
    Some(parsed)
}
