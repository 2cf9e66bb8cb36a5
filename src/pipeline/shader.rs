//! WGSL validation ahead of pipeline creation
//!
//! Shaders are parsed and validated with naga before they reach a device, so a
//! broken shader fails setup with a readable diagnostic on every backend,
//! including the host device, which never compiles them.

use crate::error::SetupError;

/// A parsed and validated WGSL module
#[derive(Debug)]
pub struct ValidatedShader {
    label: String,
    module: naga::Module,
}

impl ValidatedShader {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether an entry point with this name and stage exists
    pub fn has_entry_point(&self, name: &str, stage: naga::ShaderStage) -> bool {
        self.module
            .entry_points
            .iter()
            .any(|ep| ep.name == name && ep.stage == stage)
    }

    /// Declared workgroup size of a compute entry point
    pub fn workgroup_size(&self, entry_point: &str) -> Option<[u32; 3]> {
        self.module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry_point && ep.stage == naga::ShaderStage::Compute)
            .map(|ep| ep.workgroup_size)
    }
}

/// Parse and validate `source`, checking that every listed entry point exists.
pub fn validate_wgsl(
    label: &str,
    source: &str,
    entry_points: &[(&str, naga::ShaderStage)],
) -> Result<ValidatedShader, SetupError> {
    let failure = |message: String| SetupError::ShaderValidation {
        label: label.to_string(),
        message,
    };

    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| failure(format!("WGSL parse error: {}", e.emit_to_string(source))))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| failure(format!("Validation error: {}", e.emit_to_string(source))))?;

    let shader = ValidatedShader {
        label: label.to_string(),
        module,
    };
    for (name, stage) in entry_points {
        if !shader.has_entry_point(name, *stage) {
            return Err(failure(format!(
                "Entry point '{}' not found for stage {:?}",
                name, stage
            )));
        }
    }

    log::debug!("Validated shader {}", label);
    Ok(shader)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIVIAL_COMPUTE: &str = r#"
@group(0) @binding(0) var<storage, read_write> values: array<u32>;

@compute @workgroup_size(8)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    values[id.x] = id.x;
}
"#;

    #[test]
    fn test_valid_shader() {
        let shader =
            validate_wgsl("trivial", TRIVIAL_COMPUTE, &[("main", naga::ShaderStage::Compute)])
                .unwrap();
        assert_eq!(shader.workgroup_size("main"), Some([8, 1, 1]));
        assert_eq!(shader.label(), "trivial");
    }

    #[test]
    fn test_missing_entry_point() {
        let result = validate_wgsl(
            "trivial",
            TRIVIAL_COMPUTE,
            &[("vs_main", naga::ShaderStage::Vertex)],
        );
        assert!(matches!(result, Err(SetupError::ShaderValidation { .. })));
    }

    #[test]
    fn test_parse_error_names_the_shader() {
        let err = validate_wgsl("broken", "fn main( {", &[]).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
