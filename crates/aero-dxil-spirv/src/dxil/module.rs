use hashbrown::HashMap;

use super::instruction::{Instruction, InstructionKind, Terminator};
use super::metadata::{MdNode, MdNodeId, MdOperand};
use super::types::{AddressSpace, Type};
use super::value::{BlockId, Constant, FunctionId, GlobalId, Value, ValueId, ValueKind};

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub name: Option<String>,
    pub instructions: Vec<Instruction>,
    /// `None` only while the block is under construction.
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// The function's own value, as referenced from metadata.
    pub value: ValueId,
    pub ret: Type,
    pub args: Vec<ValueId>,
    /// Empty for declarations. The first block is the entry block.
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    pub value: ValueId,
    pub name: String,
    pub pointee: Type,
    pub address_space: AddressSpace,
    pub initializer: Option<ValueId>,
    pub is_constant: bool,
}

/// An already-parsed DXIL module.
///
/// Values, functions, globals and metadata nodes live in arenas addressed by typed ids. The
/// `add_*`/`push_*` methods build a module in memory; they are what the bitcode reader targets and
/// what tests use to assemble inputs by hand.
#[derive(Debug, Clone, Default)]
pub struct Module {
    values: Vec<Value>,
    functions: Vec<Function>,
    globals: Vec<GlobalVariable>,
    pub(crate) metadata: Vec<MdNode>,
    named_metadata: HashMap<String, Vec<MdNodeId>>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn value_type(&self, id: ValueId) -> &Type {
        &self.values[id.index()].ty
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i as u32), f))
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
    }

    /// Resolves a function value (as found in metadata operands) to its function.
    pub fn function_of_value(&self, value: ValueId) -> Option<FunctionId> {
        match self.value(value).kind {
            ValueKind::Function(id) => Some(id),
            _ => None,
        }
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        &self.globals[id.index()]
    }

    pub fn globals(&self) -> impl Iterator<Item = &GlobalVariable> {
        self.globals.iter()
    }

    pub fn global_of_value(&self, value: ValueId) -> Option<&GlobalVariable> {
        match self.value(value).kind {
            ValueKind::Global(id) => Some(self.global(id)),
            _ => None,
        }
    }

    pub fn named_metadata(&self, name: &str) -> Option<&[MdNodeId]> {
        self.named_metadata.get(name).map(Vec::as_slice)
    }

    fn push_value(&mut self, ty: Type, kind: ValueKind, name: Option<String>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value { ty, kind, name });
        id
    }

    pub fn add_constant(&mut self, ty: Type, constant: Constant) -> ValueId {
        self.push_value(ty, ValueKind::Constant(constant), None)
    }

    pub fn const_int(&mut self, ty: Type, bits: u64) -> ValueId {
        self.add_constant(ty, Constant::Int(bits))
    }

    pub fn const_i32(&mut self, value: u32) -> ValueId {
        self.const_int(Type::i32(), u64::from(value))
    }

    pub fn const_i8(&mut self, value: u8) -> ValueId {
        self.const_int(Type::i8(), u64::from(value))
    }

    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.const_int(Type::i1(), u64::from(value))
    }

    pub fn const_f32(&mut self, value: f32) -> ValueId {
        self.add_constant(Type::Float, Constant::Float(f64::from(value)))
    }

    pub fn const_float(&mut self, ty: Type, value: f64) -> ValueId {
        self.add_constant(ty, Constant::Float(value))
    }

    pub fn null(&mut self, ty: Type) -> ValueId {
        self.add_constant(ty, Constant::Null)
    }

    pub fn undef(&mut self, ty: Type) -> ValueId {
        self.push_value(ty, ValueKind::Undef, None)
    }

    /// Adds a function. `params` become argument values; the function starts as a declaration
    /// until blocks are added.
    pub fn add_function(&mut self, name: &str, ret: Type, params: Vec<Type>) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        let fn_ty = Type::Function {
            ret: Box::new(ret.clone()),
            params: params.clone(),
        };
        let value = self.push_value(fn_ty, ValueKind::Function(id), Some(name.to_owned()));
        let args = params
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.push_value(
                    ty,
                    ValueKind::Argument {
                        function: id,
                        index: index as u32,
                    },
                    None,
                )
            })
            .collect();
        self.functions.push(Function {
            name: name.to_owned(),
            value,
            ret,
            args,
            blocks: Vec::new(),
        });
        id
    }

    /// Returns the declaration of the named `dx.op` intrinsic, adding it on first use.
    pub fn dx_op(&mut self, name: &str, ret: Type, params: Vec<Type>) -> FunctionId {
        if let Some(id) = self.function_by_name(name) {
            return id;
        }
        self.add_function(name, ret, params)
    }

    pub fn add_block(&mut self, function: FunctionId, name: &str) -> BlockId {
        let blocks = &mut self.functions[function.index()].blocks;
        let id = BlockId(blocks.len() as u32);
        blocks.push(BasicBlock {
            name: Some(name.to_owned()),
            instructions: Vec::new(),
            terminator: None,
        });
        id
    }

    /// Appends an instruction producing a value of type `ty`.
    pub fn push(
        &mut self,
        function: FunctionId,
        block: BlockId,
        ty: Type,
        kind: InstructionKind,
    ) -> ValueId {
        let result = self.push_value(ty, ValueKind::Instruction { function }, None);
        self.functions[function.index()].blocks[block.index()]
            .instructions
            .push(Instruction {
                result: Some(result),
                kind,
            });
        result
    }

    /// Appends an instruction with no result.
    pub fn push_void(&mut self, function: FunctionId, block: BlockId, kind: InstructionKind) {
        self.functions[function.index()].blocks[block.index()]
            .instructions
            .push(Instruction { result: None, kind });
    }

    /// Appends a call; the result type comes from the callee.
    pub fn push_call(
        &mut self,
        function: FunctionId,
        block: BlockId,
        callee: FunctionId,
        args: Vec<ValueId>,
    ) -> Option<ValueId> {
        let ret = self.functions[callee.index()].ret.clone();
        let kind = InstructionKind::Call { callee, args };
        if ret == Type::Void {
            self.push_void(function, block, kind);
            None
        } else {
            Some(self.push(function, block, ret, kind))
        }
    }

    pub fn set_terminator(&mut self, function: FunctionId, block: BlockId, terminator: Terminator) {
        self.functions[function.index()].blocks[block.index()].terminator = Some(terminator);
    }

    /// Appends an incoming edge to the phi producing `phi`; loop headers are built before their
    /// latch values exist.
    pub fn add_phi_incoming(
        &mut self,
        function: FunctionId,
        block: BlockId,
        phi: ValueId,
        value: ValueId,
        pred: BlockId,
    ) {
        let instructions = &mut self.functions[function.index()].blocks[block.index()].instructions;
        for instruction in instructions {
            if instruction.result != Some(phi) {
                continue;
            }
            if let InstructionKind::Phi { incoming } = &mut instruction.kind {
                incoming.push((value, pred));
            }
        }
    }

    pub fn add_global(
        &mut self,
        name: &str,
        pointee: Type,
        address_space: AddressSpace,
        initializer: Option<ValueId>,
        is_constant: bool,
    ) -> ValueId {
        let id = GlobalId(self.globals.len() as u32);
        let value = self.push_value(
            Type::pointer(pointee.clone(), address_space),
            ValueKind::Global(id),
            Some(name.to_owned()),
        );
        self.globals.push(GlobalVariable {
            value,
            name: name.to_owned(),
            pointee,
            address_space,
            initializer,
            is_constant,
        });
        value
    }

    pub fn add_metadata(&mut self, operands: Vec<Option<MdOperand>>) -> MdNodeId {
        let id = MdNodeId(self.metadata.len() as u32);
        self.metadata.push(MdNode { operands });
        id
    }

    pub fn add_named_metadata(&mut self, name: &str, nodes: Vec<MdNodeId>) {
        self.named_metadata.insert(name.to_owned(), nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dx_op_declarations_are_shared() {
        let mut module = Module::new();
        let a = module.dx_op("dx.op.unary.f32", Type::Float, vec![Type::i32(), Type::Float]);
        let b = module.dx_op("dx.op.unary.f32", Type::Float, vec![Type::i32(), Type::Float]);
        assert_eq!(a, b);
        assert!(module.function(a).is_declaration());
        assert_eq!(module.function(a).args.len(), 2);
    }

    #[test]
    fn void_calls_produce_no_value() {
        let mut module = Module::new();
        let main = module.add_function("main", Type::Void, vec![]);
        let entry = module.add_block(main, "entry");
        let barrier = module.dx_op("dx.op.barrier", Type::Void, vec![Type::i32(), Type::i32()]);
        let op = module.const_i32(80);
        let mode = module.const_i32(1);
        assert_eq!(module.push_call(main, entry, barrier, vec![op, mode]), None);
        assert_eq!(module.function(main).block(entry).instructions.len(), 1);
    }

    #[test]
    fn globals_are_pointer_values() {
        let mut module = Module::new();
        let g = module.add_global("lds", Type::array(Type::Float, 64), AddressSpace::GroupShared, None, false);
        assert_eq!(
            module.value_type(g).address_space(),
            Some(AddressSpace::GroupShared)
        );
        assert_eq!(module.global_of_value(g).map(|g| g.name.as_str()), Some("lds"));
    }
}
