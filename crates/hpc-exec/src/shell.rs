use crate::error::HpcError;

pub(crate) fn shell_escape(value: &str) -> String {
    let escaped = value.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

pub(crate) fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn is_plain(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '+')
}

pub(crate) fn validate_component(field: &'static str, value: &str) -> Result<(), HpcError> {
    if value.is_empty() {
        return Err(HpcError::invalid(field, value, "must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(HpcError::invalid(field, value, "must name a real directory"));
    }
    if value.starts_with('-') {
        return Err(HpcError::invalid(field, value, "must not start with '-'"));
    }
    if let Some(ch) = value.chars().find(|ch| !is_plain(*ch)) {
        return Err(HpcError::invalid(
            field,
            value,
            format!("character {ch:?} is not allowed"),
        ));
    }
    Ok(())
}

pub(crate) fn validate_relative_path(field: &'static str, value: &str) -> Result<(), HpcError> {
    if value.starts_with('/') {
        return Err(HpcError::invalid(field, value, "must be relative"));
    }
    for part in value.split('/') {
        validate_component(field, part)?;
    }
    Ok(())
}

pub(crate) fn validate_token(
    field: &'static str,
    value: &str,
    extra: &[char],
) -> Result<(), HpcError> {
    if value.trim().is_empty() {
        return Err(HpcError::invalid(field, value, "must not be empty"));
    }
    if value.starts_with('-') {
        return Err(HpcError::invalid(field, value, "must not start with '-'"));
    }
    if let Some(ch) = value
        .chars()
        .find(|ch| !is_plain(*ch) && !extra.contains(ch))
    {
        return Err(HpcError::invalid(
            field,
            value,
            format!("character {ch:?} is not allowed"),
        ));
    }
    Ok(())
}

pub(crate) fn validate_env_name(field: &'static str, value: &str) -> Result<(), HpcError> {
    let mut chars = value.chars();
    let valid_start = chars
        .next()
        .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_');
    if !valid_start || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Err(HpcError::invalid(
            field,
            value,
            "must be a shell variable name",
        ));
    }
    Ok(())
}
