//! Entry-point discovery and per-stage execution modes.

use spirv::{Capability, ExecutionMode, ExecutionModel};
use tracing::{debug, warn};

use crate::dxil::{
    FunctionId, InputPrimitive, MdNodeId, MdOperand, Module, PrimitiveTopology, ShaderFlags,
    ShaderKind, ShaderPropertyTag, TessellatorDomain, TessellatorOutputPrimitive,
    TessellatorPartitioning, ENTRY_POINTS_METADATA, SHADER_MODEL_METADATA,
};
use crate::error::{ConvertError, Result};
use crate::remap::ShaderStage;

use super::context::{ConvertContext, EntryPointInfo};

/// First `dx.entryPoints` tuple that names a function.
pub(crate) fn find_entry_point(module: &Module) -> Result<EntryPointInfo> {
    let nodes = module
        .named_metadata(ENTRY_POINTS_METADATA)
        .ok_or_else(|| ConvertError::malformed("module has no dx.entryPoints"))?;
    for &node in nodes {
        if let Some(MdOperand::Value(value)) = module.md_operand(node, 0) {
            if let Some(function) = module.function_of_value(*value) {
                return Ok(EntryPointInfo { node, function });
            }
        }
    }
    Err(ConvertError::malformed(
        "no dx.entryPoints tuple references a function",
    ))
}

/// Value operand following `tag` in the entry point's property list.
pub(crate) fn shader_property(
    module: &Module,
    entry: EntryPointInfo,
    tag: ShaderPropertyTag,
) -> Result<Option<&MdOperand>> {
    let Some(properties) = module.md_child(entry.node, 4)? else {
        return Ok(None);
    };
    for pair in 0..module.md_len(properties) / 2 {
        if module.md_u32(properties, 2 * pair)? == tag.raw() {
            return Ok(module.md_operand(properties, 2 * pair + 1));
        }
    }
    Ok(None)
}

fn property_node(module: &Module, entry: EntryPointInfo, tag: ShaderPropertyTag) -> Result<Option<MdNodeId>> {
    match shader_property(module, entry, tag)? {
        None => Ok(None),
        Some(MdOperand::Node(node)) => Ok(Some(*node)),
        Some(other) => Err(ConvertError::malformed(format!(
            "{tag:?} property is not a tuple (found {other:?})"
        ))),
    }
}

fn property_int(module: &Module, entry: EntryPointInfo, tag: ShaderPropertyTag) -> Result<Option<u64>> {
    match shader_property(module, entry, tag)? {
        None => Ok(None),
        Some(MdOperand::Value(value)) => module
            .value(*value)
            .as_const_int()
            .map(Some)
            .ok_or_else(|| ConvertError::malformed(format!("{tag:?} property is not an integer"))),
        Some(other) => Err(ConvertError::malformed(format!(
            "{tag:?} property is not a value (found {other:?})"
        ))),
    }
}

/// Shader kind from the `ShaderKind` property, falling back to the `dx.shaderModel` string.
pub(crate) fn detect_shader_kind(module: &Module, entry: EntryPointInfo) -> Result<ShaderKind> {
    if let Some(raw) = property_int(module, entry, ShaderPropertyTag::ShaderKind)? {
        return ShaderKind::from_raw(raw as u32)
            .ok_or_else(|| ConvertError::unsupported(format!("shader kind {raw}")));
    }

    let node = module
        .named_metadata(SHADER_MODEL_METADATA)
        .and_then(|nodes| nodes.first().copied())
        .ok_or_else(|| {
            ConvertError::malformed("no ShaderKind property and no dx.shaderModel")
        })?;
    Ok(match module.md_string(node, 0)? {
        "vs" => ShaderKind::Vertex,
        "ps" => ShaderKind::Pixel,
        "hs" => ShaderKind::Hull,
        "ds" => ShaderKind::Domain,
        "gs" => ShaderKind::Geometry,
        "cs" => ShaderKind::Compute,
        "lib" => ShaderKind::Library,
        other => {
            return Err(ConvertError::unsupported(format!("shader model \"{other}\"")))
        }
    })
}

pub(crate) fn execution_model(kind: ShaderKind) -> Result<ExecutionModel> {
    Ok(match kind {
        ShaderKind::Pixel => ExecutionModel::Fragment,
        ShaderKind::Vertex => ExecutionModel::Vertex,
        ShaderKind::Hull => ExecutionModel::TessellationControl,
        ShaderKind::Domain => ExecutionModel::TessellationEvaluation,
        ShaderKind::Geometry => ExecutionModel::Geometry,
        ShaderKind::Compute => ExecutionModel::GLCompute,
        ShaderKind::RayGeneration => ExecutionModel::RayGenerationKHR,
        ShaderKind::Miss => ExecutionModel::MissKHR,
        ShaderKind::ClosestHit => ExecutionModel::ClosestHitKHR,
        ShaderKind::Callable => ExecutionModel::CallableKHR,
        ShaderKind::AnyHit => ExecutionModel::AnyHitKHR,
        ShaderKind::Intersection => ExecutionModel::IntersectionKHR,
        other => {
            return Err(ConvertError::unsupported(format!(
                "{other:?} entry points"
            )))
        }
    })
}

pub(crate) fn shader_stage(kind: ShaderKind) -> ShaderStage {
    match kind {
        ShaderKind::Vertex => ShaderStage::Vertex,
        ShaderKind::Hull => ShaderStage::Hull,
        ShaderKind::Domain => ShaderStage::Domain,
        ShaderKind::Geometry => ShaderStage::Geometry,
        ShaderKind::Pixel => ShaderStage::Pixel,
        ShaderKind::Compute => ShaderStage::Compute,
        ShaderKind::RayGeneration => ShaderStage::RayGeneration,
        ShaderKind::Intersection => ShaderStage::Intersection,
        ShaderKind::AnyHit => ShaderStage::AnyHit,
        ShaderKind::ClosestHit => ShaderStage::ClosestHit,
        ShaderKind::Miss => ShaderStage::Miss,
        ShaderKind::Callable => ShaderStage::Callable,
        _ => ShaderStage::Unknown,
    }
}

/// Stage the binding policy is told about for this module.
pub(crate) fn module_shader_stage(module: &Module) -> Result<ShaderStage> {
    let entry = find_entry_point(module)?;
    Ok(shader_stage(detect_shader_kind(module, entry)?))
}

fn required_state(module: &Module, entry: EntryPointInfo, tag: ShaderPropertyTag) -> Result<MdNodeId> {
    property_node(module, entry, tag)?
        .ok_or_else(|| ConvertError::malformed(format!("entry point has no {tag:?} property")))
}

/// Patch-constant function named by the hull shader state.
pub(crate) fn patch_constant_function(module: &Module, entry: EntryPointInfo) -> Result<FunctionId> {
    let state = required_state(module, entry, ShaderPropertyTag::HSState)?;
    let value = module.md_value(state, 0)?;
    module
        .function_of_value(value)
        .ok_or_else(|| ConvertError::malformed("HSState operand 0 is not a function"))
}

fn tessellator_domain_mode(raw: u32) -> Result<ExecutionMode> {
    match TessellatorDomain::from_raw(raw) {
        Some(TessellatorDomain::IsoLine) => Ok(ExecutionMode::Isolines),
        Some(TessellatorDomain::Tri) => Ok(ExecutionMode::Triangles),
        Some(TessellatorDomain::Quad) => Ok(ExecutionMode::Quads),
        _ => Err(ConvertError::unsupported(format!("tessellator domain {raw}"))),
    }
}

impl ConvertContext<'_> {
    pub fn emit_execution_modes(&mut self) -> Result<()> {
        match self.execution_model {
            ExecutionModel::GLCompute => self.emit_execution_modes_compute(),
            ExecutionModel::Geometry => self.emit_execution_modes_geometry(),
            ExecutionModel::TessellationControl => self.emit_execution_modes_hull(),
            ExecutionModel::TessellationEvaluation => self.emit_execution_modes_domain(),
            ExecutionModel::Fragment => self.emit_execution_modes_pixel(),
            _ if self.is_ray_tracing() => {
                self.emit_execution_modes_ray_tracing();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn emit_execution_modes_compute(&mut self) -> Result<()> {
        let threads = required_state(self.module, self.entry, ShaderPropertyTag::NumThreads)?;
        let size = [
            self.module.md_u32(threads, 0)?,
            self.module.md_u32(threads, 1)?,
            self.module.md_u32(threads, 2)?,
        ];
        debug!(?size, "workgroup size");
        self.builder.add_execution_mode(ExecutionMode::LocalSize, &size);
        Ok(())
    }

    fn emit_execution_modes_pixel(&mut self) -> Result<()> {
        if let Some(bits) = property_int(self.module, self.entry, ShaderPropertyTag::ShaderFlags)? {
            if ShaderFlags::from_bits_truncate(bits).contains(ShaderFlags::FORCE_EARLY_DEPTH_STENCIL) {
                self.builder
                    .add_execution_mode(ExecutionMode::EarlyFragmentTests, &[]);
            }
        }
        Ok(())
    }

    fn emit_execution_modes_domain(&mut self) -> Result<()> {
        self.builder.add_capability(Capability::Tessellation);
        let state = required_state(self.module, self.entry, ShaderPropertyTag::DSState)?;
        let domain = tessellator_domain_mode(self.module.md_u32(state, 0)?)?;
        self.builder.add_execution_mode(domain, &[]);
        self.exec_meta.stage_input_num_vertex = self.module.md_u32(state, 1)?;
        Ok(())
    }

    fn emit_execution_modes_hull(&mut self) -> Result<()> {
        self.builder.add_capability(Capability::Tessellation);
        let module = self.module;
        let state = required_state(module, self.entry, ShaderPropertyTag::HSState)?;

        self.exec_meta.patch_constant_function = Some(patch_constant_function(module, self.entry)?);
        let input_control_points = module.md_u32(state, 1)?;
        let output_control_points = module.md_u32(state, 2)?;

        let domain = tessellator_domain_mode(module.md_u32(state, 3)?)?;
        self.builder.add_execution_mode(domain, &[]);

        let raw = module.md_u32(state, 4)?;
        let spacing = match TessellatorPartitioning::from_raw(raw) {
            Some(TessellatorPartitioning::Integer) => ExecutionMode::SpacingEqual,
            Some(TessellatorPartitioning::Pow2) => {
                warn!("pow2 tessellator partitioning is emulated with equal spacing");
                ExecutionMode::SpacingEqual
            }
            Some(TessellatorPartitioning::FractionalEven) => ExecutionMode::SpacingFractionalEven,
            Some(TessellatorPartitioning::FractionalOdd) => ExecutionMode::SpacingFractionalOdd,
            _ => {
                return Err(ConvertError::unsupported(format!(
                    "tessellator partitioning {raw}"
                )))
            }
        };
        self.builder.add_execution_mode(spacing, &[]);

        let raw = module.md_u32(state, 5)?;
        match TessellatorOutputPrimitive::from_raw(raw) {
            Some(TessellatorOutputPrimitive::TriangleCCW) => {
                self.builder.add_execution_mode(ExecutionMode::VertexOrderCcw, &[])
            }
            Some(TessellatorOutputPrimitive::TriangleCW) => {
                self.builder.add_execution_mode(ExecutionMode::VertexOrderCw, &[])
            }
            Some(TessellatorOutputPrimitive::Point) => {
                self.builder.add_execution_mode(ExecutionMode::PointMode, &[])
            }
            Some(TessellatorOutputPrimitive::Line) => {}
            _ => {
                return Err(ConvertError::unsupported(format!(
                    "tessellator output primitive {raw}"
                )))
            }
        }

        self.builder
            .add_execution_mode(ExecutionMode::OutputVertices, &[output_control_points]);
        self.exec_meta.stage_input_num_vertex = input_control_points;
        self.exec_meta.stage_output_num_vertex = output_control_points;
        Ok(())
    }

    fn emit_execution_modes_geometry(&mut self) -> Result<()> {
        self.builder.add_capability(Capability::Geometry);
        let module = self.module;
        let state = required_state(module, self.entry, ShaderPropertyTag::GSState)?;

        let raw_input = module.md_u32(state, 0)?;
        let max_vertex_count = module.md_u32(state, 1)?;
        self.exec_meta.gs_stream_active_mask = module.md_u32(state, 2)?;
        let raw_topology = module.md_u32(state, 3)?;
        let instances = module.md_u32(state, 4)?;

        self.builder
            .add_execution_mode(ExecutionMode::Invocations, &[instances]);
        self.builder
            .add_execution_mode(ExecutionMode::OutputVertices, &[max_vertex_count]);

        let (mode, vertices) = match InputPrimitive::from_raw(raw_input) {
            Some(InputPrimitive::Point) => (ExecutionMode::InputPoints, 1),
            Some(InputPrimitive::Line) => (ExecutionMode::InputLines, 2),
            Some(InputPrimitive::LineWithAdjacency) => (ExecutionMode::InputLinesAdjacency, 4),
            Some(InputPrimitive::Triangle) => (ExecutionMode::Triangles, 3),
            Some(InputPrimitive::TriangleWithAdjacency) => {
                (ExecutionMode::InputTrianglesAdjacency, 6)
            }
            _ => {
                return Err(ConvertError::unsupported(format!(
                    "geometry input primitive {raw_input}"
                )))
            }
        };
        self.builder.add_execution_mode(mode, &[]);
        self.exec_meta.stage_input_num_vertex = vertices;

        let output = match PrimitiveTopology::from_raw(raw_topology) {
            Some(PrimitiveTopology::PointList) => ExecutionMode::OutputPoints,
            Some(PrimitiveTopology::LineStrip) => ExecutionMode::OutputLineStrip,
            Some(PrimitiveTopology::TriangleStrip) => ExecutionMode::OutputTriangleStrip,
            _ => {
                return Err(ConvertError::unsupported(format!(
                    "geometry output topology {raw_topology}"
                )))
            }
        };
        self.builder.add_execution_mode(output, &[]);
        Ok(())
    }

    fn emit_execution_modes_ray_tracing(&mut self) {
        self.builder.add_capability(Capability::RayTracingKHR);
        self.builder.add_extension("SPV_KHR_ray_tracing");
        self.builder.add_extension("SPV_EXT_descriptor_indexing");

        // Ray tracing pipelines are always fully bindless.
        for capability in [
            Capability::RuntimeDescriptorArray,
            Capability::SampledImageArrayDynamicIndexing,
            Capability::SampledImageArrayNonUniformIndexing,
            Capability::StorageImageArrayDynamicIndexing,
            Capability::StorageImageArrayNonUniformIndexing,
            Capability::StorageBufferArrayDynamicIndexing,
            Capability::StorageBufferArrayNonUniformIndexing,
            Capability::UniformBufferArrayDynamicIndexing,
            Capability::UniformBufferArrayNonUniformIndexing,
        ] {
            self.builder.add_capability(capability);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::test_support::compute_module;
    use crate::dxil::Type;

    fn module_with_shader_model(model: &str) -> Module {
        let mut module = Module::new();
        let main = module.add_function("main", Type::Void, vec![]);
        let main_value = module.function(main).value;
        let ep = module.add_metadata(vec![
            Some(MdOperand::Value(main_value)),
            Some(MdOperand::String("main".into())),
        ]);
        module.add_named_metadata(ENTRY_POINTS_METADATA, vec![ep]);
        let sm = module.add_metadata(vec![Some(MdOperand::String(model.into()))]);
        module.add_named_metadata(SHADER_MODEL_METADATA, vec![sm]);
        module
    }

    #[test]
    fn shader_model_string_selects_the_kind() {
        let module = module_with_shader_model("ps");
        let entry = find_entry_point(&module).unwrap();
        assert_eq!(detect_shader_kind(&module, entry).unwrap(), ShaderKind::Pixel);
        assert_eq!(module_shader_stage(&module).unwrap(), ShaderStage::Pixel);

        let module = module_with_shader_model("xs");
        let entry = find_entry_point(&module).unwrap();
        assert!(detect_shader_kind(&module, entry).is_err());
    }

    #[test]
    fn libraries_have_no_execution_model() {
        assert!(execution_model(ShaderKind::Library).is_err());
        assert_eq!(
            execution_model(ShaderKind::Hull).unwrap(),
            ExecutionModel::TessellationControl
        );
    }

    #[test]
    fn missing_entry_points_are_malformed() {
        let module = Module::new();
        assert!(matches!(
            find_entry_point(&module),
            Err(ConvertError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn compute_declares_local_size() {
        let module = compute_module();
        let mut remapper = crate::remap::IdentityRemapper;
        let options = crate::options::ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();
        ctx.emit_execution_modes().unwrap();
        assert_eq!(
            ctx.builder.execution_mode_literals(ExecutionMode::LocalSize),
            Some(&[8, 8, 1][..])
        );
    }

    #[test]
    fn compute_without_thread_counts_fails() {
        let module = module_with_shader_model("cs");
        let mut remapper = crate::remap::IdentityRemapper;
        let options = crate::options::ConverterOptions::default();
        let mut ctx = ConvertContext::new(&module, &mut remapper, &options, &[]).unwrap();
        assert!(matches!(
            ctx.emit_execution_modes(),
            Err(ConvertError::MalformedMetadata(_))
        ));
    }
}
