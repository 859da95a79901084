//! Stage input, output and patch-constant declarations from the entry-point signatures.

use spirv::{BuiltIn, Capability, Decoration, ExecutionMode, ExecutionModel, StorageClass};
use tracing::{debug, error, warn};

use crate::dxil::{ComponentType, InterpolationMode, MdNodeId, Module, Semantic};
use crate::error::{ConvertError, Result};
use crate::remap::{D3DStreamOutput, D3DVertexInput};
use crate::spv::Id;

use super::context::{ClipCullMeta, ConvertContext, ElementMeta, EntryPointInfo};

const INPUT_SIGNATURE: usize = 0;
const OUTPUT_SIGNATURE: usize = 1;
const PATCH_SIGNATURE: usize = 2;

/// One record of a signature list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignatureElement<'m> {
    pub id: u32,
    pub name: &'m str,
    pub component: ComponentType,
    pub semantic: Semantic,
    pub semantic_index: u32,
    pub interpolation: InterpolationMode,
    pub rows: u32,
    pub cols: u32,
    pub start_row: u32,
    pub start_col: u32,
}

impl SignatureElement<'_> {
    fn variable_name(&self) -> String {
        if self.semantic_index == 0 {
            self.name.to_owned()
        } else {
            format!("{}_{}", self.name, self.semantic_index)
        }
    }
}

pub(crate) fn parse_signature_element(module: &Module, node: MdNodeId) -> Result<SignatureElement<'_>> {
    let raw = module.md_u32(node, 2)?;
    let component = ComponentType::from_raw(raw)
        .ok_or_else(|| ConvertError::unsupported(format!("signature component type {raw}")))?;
    let raw = module.md_u32(node, 3)?;
    let semantic = Semantic::from_raw(raw)
        .ok_or_else(|| ConvertError::unsupported(format!("system value semantic {raw}")))?;
    let semantic_index = match module.md_child(node, 4)? {
        Some(indices) if module.md_len(indices) > 0 => module.md_u32(indices, 0)?,
        _ => 0,
    };
    let raw = module.md_u32(node, 5)?;
    let interpolation = InterpolationMode::from_raw(raw)
        .ok_or_else(|| ConvertError::unsupported(format!("interpolation mode {raw}")))?;

    Ok(SignatureElement {
        id: module.md_u32(node, 0)?,
        name: module.md_string(node, 1)?,
        component,
        semantic,
        semantic_index,
        interpolation,
        rows: module.md_u32(node, 6)?,
        cols: module.md_u32(node, 7)?,
        start_row: module.md_u32(node, 8)?,
        start_col: module.md_u32(node, 9)?,
    })
}

/// Elements of signature list `which` (inputs, outputs, patch constants); empty when absent.
fn signature_elements(module: &Module, entry: EntryPointInfo, which: usize) -> Result<Vec<SignatureElement<'_>>> {
    let Some(signatures) = module.md_child(entry.node, 2)? else {
        return Ok(Vec::new());
    };
    let Some(list) = module.md_child(signatures, which)? else {
        return Ok(Vec::new());
    };
    module
        .md_children(list)?
        .into_iter()
        .map(|node| parse_signature_element(module, node))
        .collect()
}

impl ConvertContext<'_> {
    fn emit_interpolation_decorations(&mut self, var: Id, mode: InterpolationMode) {
        let decorations: &[Decoration] = match mode {
            InterpolationMode::Constant => &[Decoration::Flat],
            InterpolationMode::LinearCentroid => &[Decoration::Centroid],
            InterpolationMode::LinearSample => &[Decoration::Sample],
            InterpolationMode::LinearNoperspective => &[Decoration::NoPerspective],
            InterpolationMode::LinearNoperspectiveCentroid => {
                &[Decoration::NoPerspective, Decoration::Centroid]
            }
            InterpolationMode::LinearNoperspectiveSample => {
                &[Decoration::NoPerspective, Decoration::Sample]
            }
            InterpolationMode::Undefined | InterpolationMode::Linear => &[],
        };
        if decorations.contains(&Decoration::Sample) {
            self.builder
                .add_capability(Capability::SampleRateShading);
        }
        for &decoration in decorations {
            self.builder.decorate(var, decoration, &[]);
        }
    }

    /// Routes a system value to its built-in, with the capabilities and modes it implies.
    fn emit_builtin_decoration(&mut self, var: Id, semantic: Semantic, storage: StorageClass) -> Result<()> {
        let fragment = self.execution_model == ExecutionModel::Fragment;
        let flat_input = fragment && storage == StorageClass::Input;
        let builtin = match semantic {
            Semantic::Position if fragment => BuiltIn::FragCoord,
            Semantic::Position => BuiltIn::Position,
            Semantic::SampleIndex => {
                self.builder
                    .add_capability(Capability::SampleRateShading);
                BuiltIn::SampleId
            }
            Semantic::VertexID => BuiltIn::VertexIndex,
            Semantic::InstanceID => BuiltIn::InstanceIndex,
            Semantic::InsideTessFactor => BuiltIn::TessLevelInner,
            Semantic::TessFactor => BuiltIn::TessLevelOuter,
            Semantic::Coverage => BuiltIn::SampleMask,
            Semantic::Depth | Semantic::DepthLessEqual | Semantic::DepthGreaterEqual => {
                self.builder
                    .add_execution_mode(ExecutionMode::DepthReplacing, &[]);
                match semantic {
                    Semantic::DepthLessEqual => self
                        .builder
                        .add_execution_mode(ExecutionMode::DepthLess, &[]),
                    Semantic::DepthGreaterEqual => self
                        .builder
                        .add_execution_mode(ExecutionMode::DepthGreater, &[]),
                    _ => {}
                }
                BuiltIn::FragDepth
            }
            Semantic::IsFrontFace => BuiltIn::FrontFacing,
            Semantic::ClipDistance => {
                self.builder.add_capability(Capability::ClipDistance);
                BuiltIn::ClipDistance
            }
            Semantic::CullDistance => {
                self.builder.add_capability(Capability::CullDistance);
                BuiltIn::CullDistance
            }
            Semantic::RenderTargetArrayIndex => {
                self.builder.add_capability(Capability::Geometry);
                if flat_input {
                    self.builder.decorate(var, Decoration::Flat, &[]);
                }
                BuiltIn::Layer
            }
            Semantic::ViewPortArrayIndex => {
                self.builder.add_capability(Capability::MultiViewport);
                if flat_input {
                    self.builder.decorate(var, Decoration::Flat, &[]);
                }
                BuiltIn::ViewportIndex
            }
            Semantic::PrimitiveID => {
                self.builder.add_capability(Capability::Geometry);
                if flat_input {
                    self.builder.decorate(var, Decoration::Flat, &[]);
                }
                BuiltIn::PrimitiveId
            }
            other => {
                return Err(ConvertError::unsupported(format!(
                    "system value {other:?} as a {storage:?} built-in"
                )))
            }
        };
        self.builder.register_builtin(var, builtin);
        Ok(())
    }

    fn require_16bit_io(&mut self, component: ComponentType) {
        if component.is_16bit() {
            self.builder
                .add_capability(Capability::StorageInputOutput16);
        }
    }

    /// Accumulates a clip or cull distance element into the combined array.
    fn record_clip_cull(
        element: &SignatureElement<'_>,
        clip_count: &mut u32,
        cull_count: &mut u32,
    ) -> Option<ClipCullMeta> {
        let (count, builtin) = match element.semantic {
            Semantic::ClipDistance => (clip_count, BuiltIn::ClipDistance),
            Semantic::CullDistance => (cull_count, BuiltIn::CullDistance),
            _ => return None,
        };
        let meta = ClipCullMeta {
            offset: *count,
            cols: element.cols,
            builtin,
        };
        *count += element.rows * element.cols;
        Some(meta)
    }

    fn emit_clip_cull_arrays(
        &mut self,
        storage: StorageClass,
        clip_count: u32,
        cull_count: u32,
        per_vertex: Option<u32>,
    ) -> Result<()> {
        for (count, semantic, builtin) in [
            (clip_count, Semantic::ClipDistance, BuiltIn::ClipDistance),
            (cull_count, Semantic::CullDistance, BuiltIn::CullDistance),
        ] {
            if count == 0 {
                continue;
            }
            let mut ty = self.component_type_id(ComponentType::F32, count, 1, true)?;
            if let Some(vertices) = per_vertex {
                ty = self.builder.array_type(ty, vertices, 0);
            }
            let var = self.builder.variable(storage, ty, "");
            self.emit_builtin_decoration(var, semantic, storage)?;
            self.clip_cull_variables.insert((storage, builtin), var);
        }
        Ok(())
    }

    pub fn emit_stage_input_variables(&mut self) -> Result<()> {
        let module = self.module;
        let elements = signature_elements(module, self.entry, INPUT_SIGNATURE)?;
        let arrayed = matches!(
            self.execution_model,
            ExecutionModel::Geometry
                | ExecutionModel::TessellationControl
                | ExecutionModel::TessellationEvaluation
        );
        let domain = self.execution_model == ExecutionModel::TessellationEvaluation;
        let (mut clip_count, mut cull_count) = (0, 0);

        for mut element in elements {
            self.require_16bit_io(element.component);
            if domain {
                self.patch_location_offset = self
                    .patch_location_offset
                    .max(element.start_row + element.rows);
                // Control points between hull and domain are plain user varyings.
                element.semantic = Semantic::User;
            }

            if let Some(clip) = Self::record_clip_cull(&element, &mut clip_count, &mut cull_count) {
                self.input_clip_cull.insert(element.id, clip);
                continue;
            }

            let mut cols = element.cols;
            let mut per_vertex = arrayed;
            let mut ty = match element.semantic {
                Semantic::Position => {
                    cols = 4;
                    self.component_type_id(element.component, element.rows, 4, false)?
                }
                Semantic::IsFrontFace => self.builder.bool_type(),
                _ => self.component_type_id(element.component, element.rows, element.cols, false)?,
            };
            if element.semantic == Semantic::PrimitiveID {
                per_vertex = false;
            }
            if per_vertex {
                ty = self
                    .builder
                    .array_type(ty, self.exec_meta.stage_input_num_vertex, 0);
            }

            let var = self
                .builder
                .variable(StorageClass::Input, ty, &element.variable_name());
            self.inputs.insert(
                element.id,
                ElementMeta {
                    id: var,
                    component_type: element.component,
                    semantic: element.semantic,
                    rt_index: 0,
                    rows: element.rows,
                    cols,
                    per_vertex,
                },
            );

            if element.semantic != Semantic::User {
                self.emit_builtin_decoration(var, element.semantic, StorageClass::Input)?;
                continue;
            }

            if self.execution_model == ExecutionModel::Fragment {
                self.emit_interpolation_decorations(var, element.interpolation);
            }
            let mut location = element.start_row;
            if self.execution_model == ExecutionModel::Vertex {
                let input = D3DVertexInput {
                    semantic: element.name,
                    semantic_index: element.semantic_index,
                    start_row: element.start_row,
                    rows: element.rows,
                };
                location = match self.remapper.remap_vertex_input(&input) {
                    Some(remapped) => remapped.location,
                    None => {
                        error!(semantic = element.name, "vertex input rejected by the binding policy");
                        return Err(ConvertError::rejected(format!(
                            "vertex input {}",
                            element.variable_name()
                        )));
                    }
                };
            }
            debug!(name = element.name, location, "stage input");
            self.builder.decorate(var, Decoration::Location, &[location]);
            if self.execution_model != ExecutionModel::Vertex && element.start_col != 0 {
                self.builder
                    .decorate(var, Decoration::Component, &[element.start_col]);
            }
        }

        let per_vertex = arrayed.then_some(self.exec_meta.stage_input_num_vertex);
        self.emit_clip_cull_arrays(StorageClass::Input, clip_count, cull_count, per_vertex)
    }

    fn emit_stream_output(&mut self, var: Id, element: &SignatureElement<'_>) {
        let output = D3DStreamOutput {
            semantic: element.name,
            semantic_index: element.semantic_index,
        };
        let Some(placement) = self.remapper.remap_stream_output(&output) else {
            warn!(semantic = element.name, "no stream output placement, output is not captured");
            return;
        };
        if !placement.enable {
            return;
        }
        self.builder
            .add_capability(Capability::TransformFeedback);
        self.builder.add_execution_mode(ExecutionMode::Xfb, &[]);
        self.builder
            .decorate(var, Decoration::Offset, &[placement.offset]);
        self.builder
            .decorate(var, Decoration::XfbStride, &[placement.stride]);
        self.builder
            .decorate(var, Decoration::XfbBuffer, &[placement.buffer_index]);
    }

    pub fn emit_stage_output_variables(&mut self) -> Result<()> {
        let module = self.module;
        let elements = signature_elements(module, self.entry, OUTPUT_SIGNATURE)?;
        let hull = self.execution_model == ExecutionModel::TessellationControl;
        let captures_streams = matches!(
            self.execution_model,
            ExecutionModel::Vertex | ExecutionModel::Geometry | ExecutionModel::TessellationEvaluation
        );
        let (mut clip_count, mut cull_count) = (0, 0);

        for mut element in elements {
            self.require_16bit_io(element.component);
            if hull {
                self.patch_location_offset = self
                    .patch_location_offset
                    .max(element.start_row + element.rows);
                element.semantic = Semantic::User;
            }

            if let Some(clip) = Self::record_clip_cull(&element, &mut clip_count, &mut cull_count) {
                self.output_clip_cull.insert(element.id, clip);
                continue;
            }

            let mut cols = element.cols;
            let mut ty = match element.semantic {
                Semantic::Position => {
                    cols = 4;
                    self.component_type_id(element.component, element.rows, 4, false)?
                }
                _ => self.component_type_id(element.component, element.rows, element.cols, false)?,
            };
            if element.semantic == Semantic::Coverage {
                ty = self.builder.array_type(ty, 1, 0);
            }
            if hull {
                ty = self
                    .builder
                    .array_type(ty, self.exec_meta.stage_output_num_vertex, 0);
            }

            let var = self
                .builder
                .variable(StorageClass::Output, ty, &element.variable_name());
            let mut meta = ElementMeta {
                id: var,
                component_type: element.component,
                semantic: element.semantic,
                rt_index: 0,
                rows: element.rows,
                cols,
                per_vertex: hull,
            };

            if captures_streams {
                self.emit_stream_output(var, &element);
            }

            match element.semantic {
                Semantic::Target => {
                    if self.options.dual_source_blending {
                        if element.start_row > 1 {
                            return Err(ConvertError::unsupported(
                                "dual source blending only writes render targets 0 and 1",
                            ));
                        }
                        if element.rows != 1 {
                            return Err(ConvertError::unsupported(
                                "dual source blending outputs must have one row",
                            ));
                        }
                        self.builder.decorate(var, Decoration::Location, &[0]);
                        self.builder
                            .decorate(var, Decoration::Index, &[element.start_row]);
                    } else {
                        self.builder
                            .decorate(var, Decoration::Location, &[element.start_row]);
                        meta.rt_index = element.start_row;
                    }
                    if element.start_col != 0 {
                        self.builder
                            .decorate(var, Decoration::Component, &[element.start_col]);
                    }
                }
                Semantic::User => {
                    if captures_streams {
                        self.emit_interpolation_decorations(var, element.interpolation);
                    }
                    self.builder
                        .decorate(var, Decoration::Location, &[element.start_row]);
                    if element.start_col != 0 {
                        self.builder
                            .decorate(var, Decoration::Component, &[element.start_col]);
                    }
                }
                semantic => self.emit_builtin_decoration(var, semantic, StorageClass::Output)?,
            }
            debug!(name = element.name, semantic = ?element.semantic, "stage output");
            self.outputs.insert(element.id, meta);
        }

        let per_vertex = hull.then_some(self.exec_meta.stage_output_num_vertex);
        self.emit_clip_cull_arrays(StorageClass::Output, clip_count, cull_count, per_vertex)
    }

    /// Patch constants: hull outputs or domain inputs, placed after the control-point locations.
    pub fn emit_patch_variables(&mut self) -> Result<()> {
        let storage = match self.execution_model {
            ExecutionModel::TessellationControl => StorageClass::Output,
            ExecutionModel::TessellationEvaluation => StorageClass::Input,
            _ => return Ok(()),
        };
        let module = self.module;
        for mut element in signature_elements(module, self.entry, PATCH_SIGNATURE)? {
            self.require_16bit_io(element.component);
            match element.semantic {
                Semantic::TessFactor => element.rows = 4,
                Semantic::InsideTessFactor => element.rows = 2,
                _ => {}
            }
            let ty = self.component_type_id(element.component, element.rows, element.cols, false)?;
            let var = self.builder.variable(storage, ty, &element.variable_name());
            self.patches.insert(
                element.id,
                ElementMeta {
                    id: var,
                    component_type: element.component,
                    semantic: element.semantic,
                    rt_index: 0,
                    rows: element.rows,
                    cols: element.cols,
                    per_vertex: false,
                },
            );

            if element.semantic == Semantic::User {
                self.builder.decorate(
                    var,
                    Decoration::Location,
                    &[element.start_row + self.patch_location_offset],
                );
                if element.start_col != 0 {
                    self.builder
                        .decorate(var, Decoration::Component, &[element.start_col]);
                }
            } else {
                self.emit_builtin_decoration(var, element.semantic, storage)?;
            }
            self.builder.decorate(var, Decoration::Patch, &[]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dxil::MdOperand;

    fn element_node(module: &mut Module, semantic: Semantic, index: Option<u32>) -> MdNodeId {
        let indices = index.map(|i| {
            let value = module.const_i32(i);
            MdOperand::Node(module.add_metadata(vec![Some(MdOperand::Value(value))]))
        });
        let mut operands = vec![
            Some(MdOperand::Value(module.const_i32(3))),
            Some(MdOperand::String("TEXCOORD".into())),
            Some(MdOperand::Value(module.const_i32(ComponentType::F32.raw()))),
            Some(MdOperand::Value(module.const_i32(semantic.raw()))),
            indices,
        ];
        for value in [InterpolationMode::Linear.raw(), 1, 2, 5, 1] {
            operands.push(Some(MdOperand::Value(module.const_i32(value))));
        }
        module.add_metadata(operands)
    }

    #[test]
    fn signature_records_parse_every_field() {
        let mut module = Module::new();
        let node = element_node(&mut module, Semantic::User, Some(2));
        let element = parse_signature_element(&module, node).unwrap();
        assert_eq!(element.id, 3);
        assert_eq!(element.semantic_index, 2);
        assert_eq!(element.cols, 2);
        assert_eq!((element.start_row, element.start_col), (5, 1));
        assert_eq!(element.variable_name(), "TEXCOORD_2");
    }

    #[test]
    fn semantic_index_zero_keeps_the_plain_name() {
        let mut module = Module::new();
        let node = element_node(&mut module, Semantic::User, None);
        let element = parse_signature_element(&module, node).unwrap();
        assert_eq!(element.semantic_index, 0);
        assert_eq!(element.variable_name(), "TEXCOORD");
    }

    #[test]
    fn clip_and_cull_elements_pack_separately() {
        let mut module = Module::new();
        let clip_node = element_node(&mut module, Semantic::ClipDistance, None);
        let cull_node = element_node(&mut module, Semantic::CullDistance, None);
        let clip = parse_signature_element(&module, clip_node).unwrap();
        let cull = parse_signature_element(&module, cull_node).unwrap();

        let (mut clip_count, mut cull_count) = (0, 0);
        let first = ConvertContext::record_clip_cull(&clip, &mut clip_count, &mut cull_count).unwrap();
        let second = ConvertContext::record_clip_cull(&clip, &mut clip_count, &mut cull_count).unwrap();
        let culled = ConvertContext::record_clip_cull(&cull, &mut clip_count, &mut cull_count).unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 2);
        assert_eq!(culled.offset, 0);
        assert_eq!((clip_count, cull_count), (4, 2));
    }
}
