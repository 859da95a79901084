use bitflags::bitflags;
use hashbrown::{HashMap, HashSet};
use spirv::{BuiltIn, ExecutionModel, Op, StorageClass};

use crate::cfg::NodeId;
use crate::dxil::{
    BlockId, ComponentType, FunctionId, MdNodeId, Module, ResourceClass, ResourceKind, Semantic,
    ShaderKind, ValueId,
};
use crate::error::{ConvertError, Result};
use crate::options::ConverterOptions;
use crate::remap::{ResourceRemapper, ShaderStage};
use crate::spv::{Id, Operation, SpirvBuilder};

use super::bindless::BindlessKey;
use super::root_signature::LocalRootSignatureEntry;

bitflags! {
    /// How a UAV range is touched by the function bodies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct UavAccess: u8 {
        const READ = 1 << 0;
        const WRITTEN = 1 << 1;
    }
}

/// Entry-point tuple selected from `dx.entryPoints`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryPointInfo {
    pub node: MdNodeId,
    pub function: FunctionId,
}

/// A resource global seen through `GetElementPtr`/`Load` chains, resolved by `CreateHandleForLib`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GlobalResourceRef {
    pub class: ResourceClass,
    pub index: u32,
    /// Dynamic array index applied on the way to the handle.
    pub offset: Option<ValueId>,
}

/// Where a declared resource lives, per resource class and dense index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceReference {
    /// Variable holding the descriptor, the heap array, or the shader record block.
    pub var_id: Id,
    pub kind: ResourceKind,
    pub component_type: ComponentType,
    /// Root-constant word with the dynamic heap index, or the push-constant word of a CBV.
    pub push_constant_member: u32,
    /// Static bias added to the heap index.
    pub base_offset: u32,
    pub stride: u32,
    pub bindless: bool,
    pub base_resource_is_array: bool,
    /// First register of the range; dynamic indices of direct arrays are relative to it.
    pub bind_register: u32,
    /// Index into the local root signature when the resource lives in the shader record.
    pub local_root_signature_entry: Option<usize>,
    /// CBV read from the root constants.
    pub push_constant: bool,
}

impl ResourceReference {
    pub fn new(var_id: Id, kind: ResourceKind, component_type: ComponentType) -> Self {
        Self {
            var_id,
            kind,
            component_type,
            push_constant_member: 0,
            base_offset: 0,
            stride: 0,
            bindless: false,
            base_resource_is_array: false,
            bind_register: 0,
            local_root_signature_entry: None,
            push_constant: false,
        }
    }
}

/// Counter paired with a UAV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CounterAccess {
    /// Pointer to an `R32ui` buffer image; atomics go through `ImageTexelPointer`.
    Image(Id),
    /// Physical pointer to a `uint` counter.
    Physical(Id),
}

/// Resolved form of a `dx.op.createHandle*` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleAccess {
    /// Loaded image plus the pointer it came from.
    Image { image: Id, pointer: Id },
    Sampler(Id),
    AccelerationStructure(Id),
    /// Raw or structured buffer reached through a physical address.
    PhysicalBuffer(Id),
    /// Uniform or storage block of `vec4`s.
    CbvBlock { pointer: Id, storage: StorageClass },
    /// Constant buffer mapped onto root-constant words starting at `base_word`.
    CbvRootConstants { base_word: u32 },
    /// Constant buffer stored inline in the shader record buffer.
    CbvShaderRecord { member: u32 },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceMeta {
    pub class: ResourceClass,
    pub kind: ResourceKind,
    pub component_type: ComponentType,
    pub stride: u32,
    pub non_uniform: bool,
    pub access: HandleAccess,
    pub counter: Option<CounterAccess>,
}

/// Stage-specific state gathered from the entry-point properties.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExecutionModeMeta {
    pub stage_input_num_vertex: u32,
    pub stage_output_num_vertex: u32,
    pub gs_stream_active_mask: u32,
    pub patch_constant_function: Option<FunctionId>,
}

/// A declared signature element.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ElementMeta {
    pub id: Id,
    pub component_type: ComponentType,
    pub semantic: Semantic,
    /// Render-target index for `SV_Target`.
    pub rt_index: u32,
    pub rows: u32,
    pub cols: u32,
    /// The variable carries an extra outer array dimension indexed by vertex.
    pub per_vertex: bool,
}

/// Slice of the combined clip/cull distance array owned by one signature element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClipCullMeta {
    pub offset: u32,
    pub cols: u32,
    pub builtin: BuiltIn,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RootConstants {
    pub var_id: Id,
    pub storage: StorageClass,
    pub num_words: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct ShaderRecordBuffer {
    pub var_id: Id,
    pub member_types: Vec<Id>,
}

/// Mutable state of one entry-point conversion.
pub(crate) struct ConvertContext<'a> {
    pub module: &'a Module,
    pub remapper: &'a mut dyn ResourceRemapper,
    pub options: &'a ConverterOptions,
    pub local_root_signature: &'a [LocalRootSignatureEntry],

    pub builder: SpirvBuilder,
    pub entry: EntryPointInfo,
    pub shader_kind: ShaderKind,
    pub execution_model: ExecutionModel,
    pub stage: ShaderStage,
    pub exec_meta: ExecutionModeMeta,

    pub value_map: HashMap<ValueId, Id>,
    pub id_to_type: HashMap<Id, Id>,
    pub pointer_storage: HashMap<ValueId, StorageClass>,
    /// Pointee type a bitcast pointer really refers to.
    pub actual_type: HashMap<ValueId, Id>,
    pub struct_cache: HashMap<(Vec<Id>, String), Id>,

    pub global_resource_mapping: HashMap<ValueId, GlobalResourceRef>,
    pub uav_access: HashMap<u32, UavAccess>,
    pub value_to_uav_index: HashMap<ValueId, u32>,
    pub potential_sparse: HashSet<ValueId>,
    pub sparse_feedback: HashSet<ValueId>,
    pub payload_locations: HashMap<ValueId, u32>,

    pub srvs: Vec<Option<ResourceReference>>,
    pub uavs: Vec<Option<ResourceReference>>,
    pub uav_counters: Vec<Option<ResourceReference>>,
    pub cbvs: Vec<Option<ResourceReference>>,
    pub samplers: Vec<Option<ResourceReference>>,
    pub root_constants: Option<RootConstants>,
    pub shader_record_buffer: Option<ShaderRecordBuffer>,
    pub bindless_cache: HashMap<BindlessKey, Id>,
    pub handle_meta: HashMap<ValueId, ResourceMeta>,
    pub physical_types: HashMap<&'static str, Id>,
    pub cmpxchg_type: Option<Id>,
    pub rasterizer_sample_count: Option<Id>,

    pub inputs: HashMap<u32, ElementMeta>,
    pub outputs: HashMap<u32, ElementMeta>,
    pub patches: HashMap<u32, ElementMeta>,
    pub input_clip_cull: HashMap<u32, ClipCullMeta>,
    pub output_clip_cull: HashMap<u32, ClipCullMeta>,
    pub clip_cull_variables: HashMap<(StorageClass, BuiltIn), Id>,
    pub patch_location_offset: u32,

    pub current_ops: Vec<Operation>,
    pub current_function: Option<FunctionId>,
    pub block_to_node: HashMap<(FunctionId, BlockId), NodeId>,
    pub combined_image_sampler_cache: HashMap<(Id, Id, bool), Id>,
}

impl<'a> ConvertContext<'a> {
    pub fn new(
        module: &'a Module,
        remapper: &'a mut dyn ResourceRemapper,
        options: &'a ConverterOptions,
        local_root_signature: &'a [LocalRootSignatureEntry],
    ) -> Result<Self> {
        let entry = super::execution_modes::find_entry_point(module)?;
        let shader_kind = super::execution_modes::detect_shader_kind(module, entry)?;
        let execution_model = super::execution_modes::execution_model(shader_kind)?;
        Ok(Self {
            module,
            remapper,
            options,
            local_root_signature,
            builder: SpirvBuilder::new(),
            entry,
            shader_kind,
            execution_model,
            stage: super::execution_modes::shader_stage(shader_kind),
            exec_meta: ExecutionModeMeta::default(),
            value_map: HashMap::new(),
            id_to_type: HashMap::new(),
            pointer_storage: HashMap::new(),
            actual_type: HashMap::new(),
            struct_cache: HashMap::new(),
            global_resource_mapping: HashMap::new(),
            uav_access: HashMap::new(),
            value_to_uav_index: HashMap::new(),
            potential_sparse: HashSet::new(),
            sparse_feedback: HashSet::new(),
            payload_locations: HashMap::new(),
            srvs: Vec::new(),
            uavs: Vec::new(),
            uav_counters: Vec::new(),
            cbvs: Vec::new(),
            samplers: Vec::new(),
            root_constants: None,
            shader_record_buffer: None,
            bindless_cache: HashMap::new(),
            handle_meta: HashMap::new(),
            physical_types: HashMap::new(),
            cmpxchg_type: None,
            rasterizer_sample_count: None,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            patches: HashMap::new(),
            input_clip_cull: HashMap::new(),
            output_clip_cull: HashMap::new(),
            clip_cull_variables: HashMap::new(),
            patch_location_offset: 0,
            current_ops: Vec::new(),
            current_function: None,
            block_to_node: HashMap::new(),
            combined_image_sampler_cache: HashMap::new(),
        })
    }

    pub fn is_ray_tracing(&self) -> bool {
        matches!(
            self.execution_model,
            ExecutionModel::RayGenerationKHR
                | ExecutionModel::IntersectionKHR
                | ExecutionModel::AnyHitKHR
                | ExecutionModel::ClosestHitKHR
                | ExecutionModel::MissKHR
                | ExecutionModel::CallableKHR
        )
    }

    // Operation emission

    /// Appends an operation to the block being translated.
    pub fn push(&mut self, op: Operation) {
        if let (Some(id), Some(ty)) = (op.id, op.type_id) {
            self.id_to_type.insert(id, ty);
        }
        self.current_ops.push(op);
    }

    /// Emits `op` with a fresh result id and id operands.
    pub fn emit(&mut self, op: Op, type_id: Id, operands: &[Id]) -> Id {
        let id = self.builder.allocate_id();
        let mut operation = Operation::with_result(op, id, type_id);
        operation.add_ids(operands);
        self.push(operation);
        id
    }

    pub fn emit_void(&mut self, op: Op, operands: &[Id]) {
        let mut operation = Operation::new(op);
        operation.add_ids(operands);
        self.push(operation);
    }

    /// Emits `op` whose result is the translation of the DXIL value `value`.
    pub fn emit_for(&mut self, op: Op, value: ValueId, operands: &[Id]) -> Result<Id> {
        let id = self.get_id_for_value(value)?;
        let type_id = self.get_type_id_for_value(value)?;
        let mut operation = Operation::with_result(op, id, type_id);
        operation.add_ids(operands);
        self.push(operation);
        Ok(id)
    }

    /// Like [`Self::emit_for`], with a result type that differs from the value's own translation.
    pub fn emit_as(&mut self, op: Op, value: ValueId, type_id: Id, operands: &[Id]) -> Result<Id> {
        let id = self.get_id_for_value(value)?;
        let mut operation = Operation::with_result(op, id, type_id);
        operation.add_ids(operands);
        self.push(operation);
        Ok(id)
    }

    /// Emits `op` with trailing literal operands.
    pub fn emit_with_literals(&mut self, op: Op, type_id: Id, operands: &[Id], literals: &[u32]) -> Id {
        let id = self.builder.allocate_id();
        let mut operation = Operation::with_result(op, id, type_id);
        operation.add_ids(operands).add_literals(literals);
        self.push(operation);
        id
    }

    /// Makes `id` the translation of `value`. If the value was already referenced ahead of its
    /// definition, the existing id receives a copy instead.
    pub fn define_value(&mut self, value: ValueId, id: Id) -> Result<()> {
        match self.value_map.get(&value) {
            Some(&existing) if existing != id => {
                let type_id = match self.id_to_type.get(&id) {
                    Some(&ty) => ty,
                    None => self.get_type_id_for_value(value)?,
                };
                let mut operation = Operation::with_result(Op::CopyObject, existing, type_id);
                operation.add_id(id);
                self.push(operation);
            }
            _ => {
                self.value_map.insert(value, id);
            }
        }
        Ok(())
    }

    /// Emits a `GLSL.std.450` extended instruction.
    pub fn emit_glsl(&mut self, op: spirv::GLOp, type_id: Id, operands: &[Id]) -> Id {
        let set = self.builder.glsl_std450();
        let id = self.builder.allocate_id();
        let mut operation = Operation::with_result(Op::ExtInst, id, type_id);
        operation.add_id(set).add_literal(op as u32).add_ids(operands);
        self.push(operation);
        id
    }

    /// Binds a DXIL value to an id produced elsewhere (for example a cached declaration).
    pub fn bind_value(&mut self, value: ValueId, id: Id) -> Result<()> {
        if let Some(&existing) = self.value_map.get(&value) {
            if existing != id {
                return Err(ConvertError::internal(format!(
                    "value {} was already referenced as %{existing}",
                    value.index()
                )));
            }
        }
        self.value_map.insert(value, id);
        Ok(())
    }

    pub fn take_ops(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.current_ops)
    }

    pub fn type_of_id(&self, id: Id) -> Result<Id> {
        self.id_to_type
            .get(&id)
            .copied()
            .ok_or_else(|| ConvertError::internal(format!("no recorded type for %{id}")))
    }
}
