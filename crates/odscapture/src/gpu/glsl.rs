use std::borrow::Cow;

use crate::error::{ShaderCompileError, ShaderStage};

/// Directive prepended to sources that do not declare their own version.
const DEFAULT_VERSION: &str = "#version 450";

/// Returns `source` with a leading `#version` directive.
pub(crate) fn versioned(source: &str) -> Cow<'_, str> {
    let declares_version = source
        .lines()
        .map(str::trim_start)
        .find(|line| !line.is_empty())
        .is_some_and(|line| line.starts_with("#version"));
    if declares_version {
        Cow::Borrowed(source)
    } else {
        Cow::Owned(format!("{DEFAULT_VERSION}\n{source}"))
    }
}

/// Parses one stage with naga's GLSL frontend.
///
/// The log of a failed parse is naga's rendered diagnostic for the versioned
/// source.
pub(crate) fn parse_stage(
    stage: ShaderStage,
    source: &str,
) -> Result<naga::Module, ShaderCompileError> {
    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        _ => naga::ShaderStage::Fragment,
    };
    let source = versioned(source);
    let mut frontend = naga::front::glsl::Frontend::default();
    frontend
        .parse(&naga::front::glsl::Options::from(naga_stage), &source)
        .map_err(|errors| ShaderCompileError::new(stage, errors.emit_to_string(&source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_an_existing_version() {
        let source = "\n  #version 460\nvoid main() {}";
        assert!(matches!(versioned(source), Cow::Borrowed(_)));
    }

    #[test]
    fn prepends_a_version_when_missing() {
        let versioned = versioned("void main() {}");
        assert_eq!(versioned, "#version 450\nvoid main() {}");
    }

    #[test]
    fn balanced_but_invalid_statements_are_rejected() {
        let source = "void main() { float x = 3.0 +; }";
        let err = parse_stage(ShaderStage::Fragment, source).unwrap_err();
        assert_eq!(err.stage, ShaderStage::Fragment);
        assert!(!err.log.is_empty());
    }

    #[test]
    fn missing_entry_point_is_rejected() {
        let err = parse_stage(ShaderStage::Vertex, "void helper() {}").unwrap_err();
        assert_eq!(err.stage, ShaderStage::Vertex);
    }
}
