use hashbrown::{HashMap, HashSet};
use spirv::{BuiltIn, Capability, Dim, ExecutionMode, ExecutionModel, ImageFormat, StorageClass};

use super::Id;

/// A declared type. Everything except structs is deduplicated by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDecl {
    Void,
    Bool,
    Int {
        width: u32,
        signed: bool,
    },
    Float {
        width: u32,
    },
    Vector {
        component: Id,
        count: u32,
    },
    /// Fixed-size array. `stride` of zero means no `ArrayStride` decoration.
    Array {
        element: Id,
        len: u32,
        stride: u32,
    },
    RuntimeArray {
        element: Id,
        stride: u32,
    },
    Struct {
        members: Vec<Id>,
    },
    Pointer {
        storage: StorageClass,
        pointee: Id,
    },
    Function {
        ret: Id,
        params: Vec<Id>,
    },
    Image {
        sampled_type: Id,
        dim: Dim,
        depth: bool,
        arrayed: bool,
        multisampled: bool,
        /// 1 for sampled images, 2 for storage images.
        sampled: u32,
        format: ImageFormat,
    },
    Sampler,
    SampledImage {
        image: Id,
    },
    AccelerationStructure,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstantDecl {
    Bool(bool),
    /// Scalar bits, zero-extended.
    Scalar { ty: Id, bits: u64 },
    Composite { ty: Id, parts: Vec<Id> },
    Null { ty: Id },
    Undef { ty: Id },
    SpecU32 { spec_id: u32, default: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecorationRecord {
    pub target: Id,
    /// Struct member index for member decorations.
    pub member: Option<u32>,
    pub decoration: spirv::Decoration,
    pub literals: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub id: Id,
    pub storage: StorageClass,
    /// Pointee type; the pointer type itself is `pointer_type`.
    pub pointee: Id,
    pub pointer_type: Id,
    pub initializer: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub model: ExecutionModel,
    pub function: Id,
    pub name: String,
    pub interface: Vec<Id>,
}

/// A function declared for the consumer to emit a body for (hull leaves, the discard helper).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafFunctionDecl {
    pub id: Id,
    pub name: String,
}

/// Module-level declaration state.
///
/// Identifiers are allocated densely from 1. Types (except structs) and constants are interned so
/// that requesting the same declaration twice yields the same id. Capabilities and extensions are
/// kept in first-request order and never repeated.
#[derive(Debug)]
pub struct SpirvBuilder {
    next_id: Id,

    types: Vec<(Id, TypeDecl)>,
    type_ids: HashMap<TypeDecl, Id>,
    type_by_id: HashMap<Id, TypeDecl>,

    constants: Vec<(Id, ConstantDecl)>,
    constant_ids: HashMap<ConstantDecl, Id>,
    constant_by_id: HashMap<Id, ConstantDecl>,

    variables: Vec<Variable>,
    variable_index: HashMap<Id, usize>,

    decorations: Vec<DecorationRecord>,
    decoration_set: HashSet<DecorationRecord>,
    names: HashMap<Id, String>,
    member_names: HashMap<(Id, u32), String>,

    capabilities: Vec<Capability>,
    extensions: Vec<String>,
    execution_modes: Vec<(ExecutionMode, Vec<u32>)>,
    entry_point: Option<EntryPoint>,
    functions: Vec<LeafFunctionDecl>,

    builtins: HashMap<Id, BuiltIn>,
    builtin_inputs: HashMap<BuiltIn, Id>,
    glsl_std450: Option<Id>,
    discard_function: Option<Id>,
}

impl Default for SpirvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpirvBuilder {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            types: Vec::new(),
            type_ids: HashMap::new(),
            type_by_id: HashMap::new(),
            constants: Vec::new(),
            constant_ids: HashMap::new(),
            constant_by_id: HashMap::new(),
            variables: Vec::new(),
            variable_index: HashMap::new(),
            decorations: Vec::new(),
            decoration_set: HashSet::new(),
            names: HashMap::new(),
            member_names: HashMap::new(),
            capabilities: vec![Capability::Shader],
            extensions: Vec::new(),
            execution_modes: Vec::new(),
            entry_point: None,
            functions: Vec::new(),
            builtins: HashMap::new(),
            builtin_inputs: HashMap::new(),
            glsl_std450: None,
            discard_function: None,
        }
    }

    pub fn allocate_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// One past the largest id handed out so far.
    pub fn bound(&self) -> Id {
        self.next_id
    }

    // Types

    fn intern_type(&mut self, decl: TypeDecl) -> Id {
        if let Some(&id) = self.type_ids.get(&decl) {
            return id;
        }
        let id = self.allocate_id();
        match &decl {
            TypeDecl::Array { stride, .. } | TypeDecl::RuntimeArray { stride, .. } if *stride != 0 => {
                let stride = *stride;
                self.decorate(id, spirv::Decoration::ArrayStride, &[stride]);
            }
            _ => {}
        }
        self.type_ids.insert(decl.clone(), id);
        self.type_by_id.insert(id, decl.clone());
        self.types.push((id, decl));
        id
    }

    pub fn void_type(&mut self) -> Id {
        self.intern_type(TypeDecl::Void)
    }

    pub fn bool_type(&mut self) -> Id {
        self.intern_type(TypeDecl::Bool)
    }

    pub fn uint_type(&mut self, width: u32) -> Id {
        self.intern_type(TypeDecl::Int {
            width,
            signed: false,
        })
    }

    pub fn int_type(&mut self, width: u32) -> Id {
        self.intern_type(TypeDecl::Int {
            width,
            signed: true,
        })
    }

    pub fn float_type(&mut self, width: u32) -> Id {
        self.intern_type(TypeDecl::Float { width })
    }

    /// `count == 1` returns the component type itself.
    pub fn vector_type(&mut self, component: Id, count: u32) -> Id {
        if count == 1 {
            return component;
        }
        self.intern_type(TypeDecl::Vector { component, count })
    }

    pub fn array_type(&mut self, element: Id, len: u32, stride: u32) -> Id {
        self.intern_type(TypeDecl::Array {
            element,
            len,
            stride,
        })
    }

    pub fn runtime_array_type(&mut self, element: Id, stride: u32) -> Id {
        self.intern_type(TypeDecl::RuntimeArray { element, stride })
    }

    /// Always declares a new struct; callers that want sharing keep their own cache.
    pub fn struct_type(&mut self, members: &[Id], name: &str) -> Id {
        let id = self.allocate_id();
        let decl = TypeDecl::Struct {
            members: members.to_vec(),
        };
        self.type_by_id.insert(id, decl.clone());
        self.types.push((id, decl));
        if !name.is_empty() {
            self.set_name(id, name);
        }
        id
    }

    pub fn pointer_type(&mut self, storage: StorageClass, pointee: Id) -> Id {
        self.intern_type(TypeDecl::Pointer { storage, pointee })
    }

    pub fn function_type(&mut self, ret: Id, params: &[Id]) -> Id {
        self.intern_type(TypeDecl::Function {
            ret,
            params: params.to_vec(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn image_type(
        &mut self,
        sampled_type: Id,
        dim: Dim,
        depth: bool,
        arrayed: bool,
        multisampled: bool,
        sampled: u32,
        format: ImageFormat,
    ) -> Id {
        self.intern_type(TypeDecl::Image {
            sampled_type,
            dim,
            depth,
            arrayed,
            multisampled,
            sampled,
            format,
        })
    }

    pub fn sampler_type(&mut self) -> Id {
        self.intern_type(TypeDecl::Sampler)
    }

    pub fn sampled_image_type(&mut self, image: Id) -> Id {
        self.intern_type(TypeDecl::SampledImage { image })
    }

    pub fn acceleration_structure_type(&mut self) -> Id {
        self.intern_type(TypeDecl::AccelerationStructure)
    }

    pub fn type_decl(&self, id: Id) -> Option<&TypeDecl> {
        self.type_by_id.get(&id)
    }

    pub fn types(&self) -> &[(Id, TypeDecl)] {
        &self.types
    }

    /// Component type of a vector, or the type itself.
    pub fn scalar_type_of(&self, id: Id) -> Id {
        match self.type_decl(id) {
            Some(TypeDecl::Vector { component, .. }) => *component,
            _ => id,
        }
    }

    pub fn vector_size_of(&self, id: Id) -> u32 {
        match self.type_decl(id) {
            Some(TypeDecl::Vector { count, .. }) => *count,
            _ => 1,
        }
    }

    pub fn pointee_of(&self, pointer_type: Id) -> Option<(StorageClass, Id)> {
        match self.type_decl(pointer_type) {
            Some(TypeDecl::Pointer { storage, pointee }) => Some((*storage, *pointee)),
            _ => None,
        }
    }

    // Constants

    fn intern_constant(&mut self, decl: ConstantDecl) -> Id {
        if let Some(&id) = self.constant_ids.get(&decl) {
            return id;
        }
        let id = self.allocate_id();
        self.constant_ids.insert(decl.clone(), id);
        self.constant_by_id.insert(id, decl.clone());
        self.constants.push((id, decl));
        id
    }

    pub fn constant_bool(&mut self, value: bool) -> Id {
        self.bool_type();
        self.intern_constant(ConstantDecl::Bool(value))
    }

    pub fn constant_scalar(&mut self, ty: Id, bits: u64) -> Id {
        self.intern_constant(ConstantDecl::Scalar { ty, bits })
    }

    pub fn constant_u16(&mut self, value: u16) -> Id {
        let ty = self.uint_type(16);
        self.constant_scalar(ty, u64::from(value))
    }

    pub fn constant_u32(&mut self, value: u32) -> Id {
        let ty = self.uint_type(32);
        self.constant_scalar(ty, u64::from(value))
    }

    pub fn constant_u64(&mut self, value: u64) -> Id {
        let ty = self.uint_type(64);
        self.constant_scalar(ty, value)
    }

    pub fn constant_f16_bits(&mut self, bits: u16) -> Id {
        let ty = self.float_type(16);
        self.constant_scalar(ty, u64::from(bits))
    }

    pub fn constant_f32(&mut self, value: f32) -> Id {
        let ty = self.float_type(32);
        self.constant_scalar(ty, u64::from(value.to_bits()))
    }

    pub fn constant_f64(&mut self, value: f64) -> Id {
        let ty = self.float_type(64);
        self.constant_scalar(ty, value.to_bits())
    }

    pub fn constant_composite(&mut self, ty: Id, parts: &[Id]) -> Id {
        self.intern_constant(ConstantDecl::Composite {
            ty,
            parts: parts.to_vec(),
        })
    }

    pub fn constant_null(&mut self, ty: Id) -> Id {
        self.intern_constant(ConstantDecl::Null { ty })
    }

    pub fn undef(&mut self, ty: Id) -> Id {
        self.intern_constant(ConstantDecl::Undef { ty })
    }

    /// 32-bit unsigned specialization constant decorated with `SpecId`.
    pub fn spec_constant_u32(&mut self, spec_id: u32, default: u32) -> Id {
        self.uint_type(32);
        let id = self.intern_constant(ConstantDecl::SpecU32 { spec_id, default });
        self.decorate(id, spirv::Decoration::SpecId, &[spec_id]);
        id
    }

    pub fn constant_decl(&self, id: Id) -> Option<&ConstantDecl> {
        self.constant_by_id.get(&id)
    }

    pub fn constants(&self) -> &[(Id, ConstantDecl)] {
        &self.constants
    }

    /// Integer value of a scalar (or bool) constant.
    pub fn constant_value(&self, id: Id) -> Option<u64> {
        match self.constant_decl(id)? {
            ConstantDecl::Bool(b) => Some(u64::from(*b)),
            ConstantDecl::Scalar { bits, .. } => Some(*bits),
            ConstantDecl::Null { .. } => Some(0),
            _ => None,
        }
    }

    // Variables

    /// Declares a global (or function-local when `storage` is `Function`) variable.
    pub fn variable(&mut self, storage: StorageClass, pointee: Id, name: &str) -> Id {
        self.variable_with_initializer(storage, pointee, name, None)
    }

    pub fn variable_with_initializer(
        &mut self,
        storage: StorageClass,
        pointee: Id,
        name: &str,
        initializer: Option<Id>,
    ) -> Id {
        let pointer_type = self.pointer_type(storage, pointee);
        let id = self.allocate_id();
        self.variable_index.insert(id, self.variables.len());
        self.variables.push(Variable {
            id,
            storage,
            pointee,
            pointer_type,
            initializer,
        });
        if !name.is_empty() {
            self.set_name(id, name);
        }
        if matches!(storage, StorageClass::Input | StorageClass::Output) {
            if let Some(entry) = self.entry_point.as_mut() {
                entry.interface.push(id);
            }
        }
        id
    }

    pub fn variable_decl(&self, id: Id) -> Option<&Variable> {
        self.variable_index.get(&id).map(|&i| &self.variables[i])
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.variables
            .iter()
            .find(|v| self.names.get(&v.id).map(String::as_str) == Some(name))
    }

    // Decorations and names

    /// Adds a decoration unless the identical one is already present.
    pub fn decorate(&mut self, target: Id, decoration: spirv::Decoration, literals: &[u32]) {
        self.push_decoration(DecorationRecord {
            target,
            member: None,
            decoration,
            literals: literals.to_vec(),
        });
    }

    pub fn decorate_member(
        &mut self,
        target: Id,
        member: u32,
        decoration: spirv::Decoration,
        literals: &[u32],
    ) {
        self.push_decoration(DecorationRecord {
            target,
            member: Some(member),
            decoration,
            literals: literals.to_vec(),
        });
    }

    fn push_decoration(&mut self, record: DecorationRecord) {
        if self.decoration_set.insert(record.clone()) {
            self.decorations.push(record);
        }
    }

    pub fn decorations(&self) -> &[DecorationRecord] {
        &self.decorations
    }

    pub fn decorations_of(&self, target: Id) -> impl Iterator<Item = &DecorationRecord> + '_ {
        self.decorations
            .iter()
            .filter(move |d| d.target == target && d.member.is_none())
    }

    /// Literals of the first decoration of the given kind on `target`.
    pub fn decoration_literals(&self, target: Id, decoration: spirv::Decoration) -> Option<&[u32]> {
        self.decorations_of(target)
            .find(|d| d.decoration == decoration)
            .map(|d| d.literals.as_slice())
    }

    pub fn has_decoration(&self, target: Id, decoration: spirv::Decoration) -> bool {
        self.decoration_literals(target, decoration).is_some()
    }

    pub fn has_member_decoration(&self, target: Id, member: u32, decoration: spirv::Decoration) -> bool {
        self.decorations
            .iter()
            .any(|d| d.target == target && d.member == Some(member) && d.decoration == decoration)
    }

    pub fn set_name(&mut self, id: Id, name: &str) {
        self.names.insert(id, name.to_owned());
    }

    pub fn set_member_name(&mut self, id: Id, member: u32, name: &str) {
        self.member_names.insert((id, member), name.to_owned());
    }

    pub fn name_of(&self, id: Id) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    // Capabilities, extensions, modes

    pub fn add_capability(&mut self, capability: Capability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn add_extension(&mut self, extension: &str) {
        if !self.extensions.iter().any(|e| e == extension) {
            self.extensions.push(extension.to_owned());
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }

    pub fn add_execution_mode(&mut self, mode: ExecutionMode, literals: &[u32]) {
        self.execution_modes.push((mode, literals.to_vec()));
    }

    pub fn execution_modes(&self) -> &[(ExecutionMode, Vec<u32>)] {
        &self.execution_modes
    }

    pub fn execution_mode_literals(&self, mode: ExecutionMode) -> Option<&[u32]> {
        self.execution_modes
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, literals)| literals.as_slice())
    }

    // Functions

    /// Declares the entry point; stage IO variables declared afterwards join its interface.
    pub fn set_entry_point(&mut self, model: ExecutionModel, name: &str) -> Id {
        let function = self.allocate_id();
        self.entry_point = Some(EntryPoint {
            model,
            function,
            name: name.to_owned(),
            interface: Vec::new(),
        });
        self.set_name(function, name);
        function
    }

    pub fn entry_point(&self) -> Option<&EntryPoint> {
        self.entry_point.as_ref()
    }

    pub fn declare_function(&mut self, name: &str) -> Id {
        let id = self.allocate_id();
        self.functions.push(LeafFunctionDecl {
            id,
            name: name.to_owned(),
        });
        self.set_name(id, name);
        id
    }

    pub fn functions(&self) -> &[LeafFunctionDecl] {
        &self.functions
    }

    /// Helper function that performs a fragment discard; its body is left to the consumer.
    pub fn discard_function(&mut self) -> Id {
        if let Some(id) = self.discard_function {
            return id;
        }
        let id = self.declare_function("discard");
        self.discard_function = Some(id);
        id
    }

    pub fn glsl_std450(&mut self) -> Id {
        if let Some(id) = self.glsl_std450 {
            return id;
        }
        let id = self.allocate_id();
        self.set_name(id, "GLSL.std.450");
        self.glsl_std450 = Some(id);
        id
    }

    // Built-ins

    pub fn register_builtin(&mut self, variable: Id, builtin: BuiltIn) {
        self.builtins.insert(variable, builtin);
        self.decorate(variable, spirv::Decoration::BuiltIn, &[builtin as u32]);
    }

    pub fn builtin_of(&self, variable: Id) -> Option<BuiltIn> {
        self.builtins.get(&variable).copied()
    }

    /// Input variable for a compute/tessellation/geometry built-in, created on first request.
    ///
    /// Variables declared from a signature element are registered through [`Self::register_builtin`]
    /// and are not returned here.
    ///
    /// Returns `None` for built-ins that have no fixed input shape here.
    pub fn builtin_shader_input(&mut self, builtin: BuiltIn) -> Option<Id> {
        if let Some(&id) = self.builtin_inputs.get(&builtin) {
            return Some(id);
        }
        let u32_type = self.uint_type(32);
        let (ty, name) = match builtin {
            BuiltIn::TessCoord => {
                let f32_type = self.float_type(32);
                (self.vector_type(f32_type, 3), "TessCoord")
            }
            BuiltIn::GlobalInvocationId => (self.vector_type(u32_type, 3), "GlobalInvocationId"),
            BuiltIn::WorkgroupId => (self.vector_type(u32_type, 3), "WorkgroupId"),
            BuiltIn::LocalInvocationId => (self.vector_type(u32_type, 3), "LocalInvocationId"),
            BuiltIn::LocalInvocationIndex => (u32_type, "LocalInvocationIndex"),
            BuiltIn::InvocationId => (u32_type, "InvocationId"),
            BuiltIn::PrimitiveId => (u32_type, "PrimitiveId"),
            BuiltIn::SampleId => (u32_type, "SampleId"),
            _ => return None,
        };
        let id = self.variable(StorageClass::Input, ty, name);
        self.register_builtin(id, builtin);
        self.builtin_inputs.insert(builtin, id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_and_constants_are_interned() {
        let mut b = SpirvBuilder::new();
        let f32_a = b.float_type(32);
        let f32_b = b.float_type(32);
        assert_eq!(f32_a, f32_b);
        assert_eq!(b.vector_type(f32_a, 4), b.vector_type(f32_b, 4));
        assert_eq!(b.vector_type(f32_a, 1), f32_a);
        assert_eq!(b.constant_u32(5), b.constant_u32(5));
        assert_ne!(b.constant_u32(5), b.constant_u32(6));
        assert_ne!(b.constant_f32(1.0), b.constant_u32(1.0f32.to_bits()));
    }

    #[test]
    fn structs_are_never_shared() {
        let mut b = SpirvBuilder::new();
        let u = b.uint_type(32);
        assert_ne!(b.struct_type(&[u], "A"), b.struct_type(&[u], "A"));
    }

    #[test]
    fn array_stride_is_decorated_once() {
        let mut b = SpirvBuilder::new();
        let u = b.uint_type(32);
        let arr = b.runtime_array_type(u, 4);
        assert_eq!(b.runtime_array_type(u, 4), arr);
        assert_eq!(b.decoration_literals(arr, spirv::Decoration::ArrayStride), Some(&[4][..]));
        assert_eq!(b.decorations_of(arr).count(), 1);
        let plain = b.runtime_array_type(u, 0);
        assert!(!b.has_decoration(plain, spirv::Decoration::ArrayStride));
    }

    #[test]
    fn capabilities_and_extensions_are_unique() {
        let mut b = SpirvBuilder::new();
        b.add_capability(Capability::RuntimeDescriptorArray);
        b.add_capability(Capability::RuntimeDescriptorArray);
        b.add_extension("SPV_EXT_descriptor_indexing");
        b.add_extension("SPV_EXT_descriptor_indexing");
        assert_eq!(
            b.capabilities()
                .iter()
                .filter(|&&c| c == Capability::RuntimeDescriptorArray)
                .count(),
            1
        );
        assert_eq!(b.extensions().len(), 1);
    }

    #[test]
    fn builtin_inputs_are_created_lazily_once() {
        let mut b = SpirvBuilder::new();
        b.set_entry_point(ExecutionModel::GLCompute, "main");
        let a = b.builtin_shader_input(BuiltIn::GlobalInvocationId);
        let c = b.builtin_shader_input(BuiltIn::GlobalInvocationId);
        assert_eq!(a, c);
        let id = a.expect("builtin");
        assert_eq!(b.builtin_of(id), Some(BuiltIn::GlobalInvocationId));
        assert_eq!(b.entry_point().map(|e| e.interface.clone()), Some(vec![id]));
        assert_eq!(b.builtin_shader_input(BuiltIn::Position), None);
    }
}
