// Shared test helpers (integration tests compile as separate crates, so put
// common code in a submodule to avoid it becoming its own test target).
#![allow(dead_code)]

use aero_dxil_spirv::dxil::{
    AddressSpace, BlockId, ComponentType, DxOp, FunctionId, MdNodeId, MdOperand, Module,
    ResourceClass, ResourceKind, Semantic, ShaderKind, ShaderPropertyTag, Terminator, Type, ValueId,
    ENTRY_POINTS_METADATA, RESOURCES_METADATA,
};

/// Routes `tracing` output through the test harness so `cargo test -- --nocapture` shows it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Signature element as written into the entry-point signature lists.
#[derive(Debug, Clone)]
pub struct Element {
    pub id: u32,
    pub name: &'static str,
    pub component: ComponentType,
    pub semantic: Semantic,
    pub semantic_index: u32,
    pub rows: u32,
    pub cols: u32,
    pub start_row: u32,
}

impl Element {
    pub fn user(id: u32, name: &'static str, start_row: u32, cols: u32) -> Self {
        Self {
            id,
            name,
            component: ComponentType::F32,
            semantic: Semantic::User,
            semantic_index: 0,
            rows: 1,
            cols,
            start_row,
        }
    }

    pub fn system(id: u32, name: &'static str, semantic: Semantic, cols: u32) -> Self {
        Self {
            semantic,
            ..Self::user(id, name, 0, cols)
        }
    }
}

/// Resource list entry. Typed resources carry `component`; raw and structured ones `stride`.
#[derive(Debug, Clone)]
pub struct Resource {
    pub index: u32,
    pub name: &'static str,
    pub space: u32,
    pub register: u32,
    pub range_size: u32,
    pub kind: ResourceKind,
    pub component: ComponentType,
    pub stride: u32,
    pub has_counter: bool,
}

impl Resource {
    pub fn typed(index: u32, name: &'static str, register: u32, kind: ResourceKind) -> Self {
        Self {
            index,
            name,
            space: 0,
            register,
            range_size: 1,
            kind,
            component: ComponentType::F32,
            stride: 0,
            has_counter: false,
        }
    }
}

/// Assembles a single-entry-point DXIL module.
pub struct ShaderBuilder {
    pub module: Module,
    pub main: FunctionId,
    pub block: BlockId,
    properties: Vec<Option<MdOperand>>,
    inputs: Vec<Element>,
    outputs: Vec<Element>,
    patch: Vec<Element>,
    srvs: Vec<Resource>,
    uavs: Vec<Resource>,
    samplers: Vec<Resource>,
}

impl ShaderBuilder {
    pub fn new(kind: ShaderKind) -> Self {
        let mut module = Module::new();
        let main = module.add_function("main", Type::Void, vec![]);
        let block = module.add_block(main, "entry");
        let mut builder = Self {
            module,
            main,
            block,
            properties: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            patch: Vec::new(),
            srvs: Vec::new(),
            uavs: Vec::new(),
            samplers: Vec::new(),
        };
        let kind = builder.module.const_i32(kind.raw());
        builder.property(ShaderPropertyTag::ShaderKind, MdOperand::Value(kind));
        builder
    }

    pub fn compute(x: u32, y: u32, z: u32) -> Self {
        let mut builder = Self::new(ShaderKind::Compute);
        let threads = builder.tuple(&[x, y, z]);
        builder.property(ShaderPropertyTag::NumThreads, MdOperand::Node(threads));
        builder
    }

    pub fn property(&mut self, tag: ShaderPropertyTag, value: MdOperand) {
        let tag = self.module.const_i32(tag.raw());
        self.properties.push(Some(MdOperand::Value(tag)));
        self.properties.push(Some(value));
    }

    /// Metadata tuple of i32 constants.
    pub fn tuple(&mut self, values: &[u32]) -> MdNodeId {
        let operands = values
            .iter()
            .map(|&v| Some(MdOperand::Value(self.module.const_i32(v))))
            .collect();
        self.module.add_metadata(operands)
    }

    pub fn input(&mut self, element: Element) {
        self.inputs.push(element);
    }

    pub fn output(&mut self, element: Element) {
        self.outputs.push(element);
    }

    pub fn patch_constant(&mut self, element: Element) {
        self.patch.push(element);
    }

    pub fn srv(&mut self, resource: Resource) {
        self.srvs.push(resource);
    }

    pub fn uav(&mut self, resource: Resource) {
        self.uavs.push(resource);
    }

    /// Only `index`, `name`, `space`, `register` and `range_size` are written for samplers.
    pub fn sampler(&mut self, resource: Resource) {
        self.samplers.push(resource);
    }

    /// Calls `dx.op.<op>` in the current block with the opcode prepended to `args`.
    pub fn dx_call(&mut self, op: DxOp, ret: Type, args: &[ValueId]) -> Option<ValueId> {
        let opcode = self.module.const_i32(op.raw());
        let mut operands = vec![opcode];
        operands.extend_from_slice(args);
        let params = operands
            .iter()
            .map(|&v| self.module.value_type(v).clone())
            .collect();
        let callee = self.module.dx_op(&format!("dx.op.{op:?}"), ret, params);
        self.module.push_call(self.main, self.block, callee, operands)
    }

    pub fn create_handle(&mut self, class: u32, range: u32, register: u32) -> ValueId {
        let class = self.module.const_i8(class as u8);
        let range = self.module.const_i32(range);
        let index = self.module.const_i32(register);
        let non_uniform = self.module.const_bool(false);
        self.dx_call(
            DxOp::CreateHandle,
            handle_type(),
            &[class, range, index, non_uniform],
        )
        .expect("handles are values")
    }

    pub fn ret(&mut self) {
        self.module
            .set_terminator(self.main, self.block, Terminator::Ret { value: None });
    }

    pub fn finish(mut self) -> Module {
        let inputs = self.signature_list(&self.inputs.clone());
        let outputs = self.signature_list(&self.outputs.clone());
        let patch = self.signature_list(&self.patch.clone());
        let signatures = self.module.add_metadata(vec![inputs, outputs, patch]);

        let srvs = self.resource_list(&self.srvs.clone(), ResourceClass::Srv);
        let uavs = self.resource_list(&self.uavs.clone(), ResourceClass::Uav);
        let samplers = self.resource_list(&self.samplers.clone(), ResourceClass::Sampler);
        if srvs.is_some() || uavs.is_some() || samplers.is_some() {
            let resources = self.module.add_metadata(vec![srvs, uavs, None, samplers]);
            self.module
                .add_named_metadata(RESOURCES_METADATA, vec![resources]);
        }

        let properties = self.module.add_metadata(self.properties.clone());
        let main_value = self.module.function(self.main).value;
        let entry = self.module.add_metadata(vec![
            Some(MdOperand::Value(main_value)),
            Some(MdOperand::String("main".into())),
            Some(MdOperand::Node(signatures)),
            None,
            Some(MdOperand::Node(properties)),
        ]);
        self.module
            .add_named_metadata(ENTRY_POINTS_METADATA, vec![entry]);
        self.module
    }

    fn signature_list(&mut self, elements: &[Element]) -> Option<MdOperand> {
        if elements.is_empty() {
            return None;
        }
        let nodes = elements
            .iter()
            .map(|e| {
                let indices = self.tuple(&[e.semantic_index]);
                let mut operands = vec![
                    Some(MdOperand::Value(self.module.const_i32(e.id))),
                    Some(MdOperand::String(e.name.into())),
                ];
                for v in [e.component.raw(), e.semantic.raw()] {
                    operands.push(Some(MdOperand::Value(self.module.const_i32(v))));
                }
                operands.push(Some(MdOperand::Node(indices)));
                for v in [2, e.rows, e.cols, e.start_row, 0] {
                    operands.push(Some(MdOperand::Value(self.module.const_i32(v))));
                }
                Some(MdOperand::Node(self.module.add_metadata(operands)))
            })
            .collect();
        Some(MdOperand::Node(self.module.add_metadata(nodes)))
    }

    fn resource_list(&mut self, resources: &[Resource], class: ResourceClass) -> Option<MdOperand> {
        if resources.is_empty() {
            return None;
        }
        let nodes = resources
            .iter()
            .map(|r| {
                let mut operands = vec![
                    Some(MdOperand::Value(self.module.const_i32(r.index))),
                    None,
                    Some(MdOperand::String(r.name.into())),
                ];
                for v in [r.space, r.register, r.range_size] {
                    operands.push(Some(MdOperand::Value(self.module.const_i32(v))));
                }
                if class == ResourceClass::Sampler {
                    // Sampler kind: default.
                    operands.push(Some(MdOperand::Value(self.module.const_i32(0))));
                    return Some(MdOperand::Node(self.module.add_metadata(operands)));
                }
                operands.push(Some(MdOperand::Value(self.module.const_i32(r.kind.raw()))));
                let tags = if r.kind.is_raw_or_structured() {
                    self.tuple(&[1, r.stride])
                } else {
                    self.tuple(&[0, r.component.raw()])
                };
                if class == ResourceClass::Uav {
                    operands.push(Some(MdOperand::Value(self.module.const_bool(false))));
                    operands.push(Some(MdOperand::Value(self.module.const_bool(r.has_counter))));
                    operands.push(Some(MdOperand::Value(self.module.const_bool(false))));
                } else {
                    operands.push(Some(MdOperand::Value(self.module.const_i32(0))));
                }
                operands.push(Some(MdOperand::Node(tags)));
                Some(MdOperand::Node(self.module.add_metadata(operands)))
            })
            .collect();
        Some(MdOperand::Node(self.module.add_metadata(nodes)))
    }
}

pub fn handle_type() -> Type {
    Type::named_struct("dx.types.Handle", vec![Type::pointer(Type::i8(), AddressSpace::Thread)])
}

/// `dx.types.ResRet.<element>`: four components plus the residency status.
pub fn res_ret_type(element: Type) -> Type {
    Type::named_struct(
        "dx.types.ResRet",
        vec![element.clone(), element.clone(), element.clone(), element, Type::i32()],
    )
}
