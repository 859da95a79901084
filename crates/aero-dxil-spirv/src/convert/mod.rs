//! The conversion orchestrator.
//!
//! [`Converter`] owns the binding policy, the options and the registered local root signature.
//! Each [`Converter::convert_entry_point`] call builds a fresh conversion context, declares the
//! module-level state (execution modes, resources, stage IO, globals) and then turns the entry
//! function into graph nodes.

mod analysis;
mod bindless;
mod builtins;
mod context;
mod execution_modes;
mod function;
mod globals;
mod instructions;
mod resources;
mod root_signature;
mod stage_io;
mod values;

use spirv::Capability;
use tracing::debug;

use crate::cfg::{CfgNodePool, NodeId};
use crate::dxil::{Module, ResourceClass, ShaderKind};
use crate::error::Result;
use crate::options::{ConverterOption, ConverterOptions};
use crate::remap::{IdentityRemapper, ResourceRemapper, ShaderStage};
use crate::spv::{Id, SpirvBuilder};

use context::ConvertContext;

pub use root_signature::{LocalRootSignatureEntry, UNBOUNDED_DESCRIPTORS};

/// A function body emitted next to the entry point and called from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafFunction {
    pub entry: NodeId,
    /// Declared through [`SpirvBuilder::declare_function`].
    pub function_id: Id,
}

/// Result of a successful conversion.
///
/// Dominance is computed from `entry`. Leaf function subgraphs live in the same pool but are not
/// reachable from it; re-root the pool with [`CfgNodePool::set_entry`] before querying them.
#[derive(Debug)]
pub struct ConvertedFunction {
    pub builder: SpirvBuilder,
    pub pool: CfgNodePool,
    pub entry: NodeId,
    pub leaf_functions: Vec<LeafFunction>,
}

pub struct Converter<'a> {
    module: &'a Module,
    remapper: Box<dyn ResourceRemapper + 'a>,
    options: ConverterOptions,
    local_root_signature: Vec<LocalRootSignatureEntry>,
}

impl<'a> Converter<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self {
            module,
            remapper: Box::new(IdentityRemapper),
            options: ConverterOptions::default(),
            local_root_signature: Vec::new(),
        }
    }

    pub fn set_resource_remapper(&mut self, remapper: impl ResourceRemapper + 'a) {
        self.remapper = Box::new(remapper);
    }

    pub fn set_options(&mut self, options: ConverterOptions) {
        self.options = options;
    }

    pub fn set_option(&mut self, option: ConverterOption) {
        self.options.apply(option);
    }

    pub fn options(&self) -> &ConverterOptions {
        &self.options
    }

    pub fn add_local_root_constants(&mut self, register_space: u32, register_index: u32, num_words: u32) {
        self.local_root_signature
            .push(LocalRootSignatureEntry::Constants {
                register_space,
                register_index,
                num_words,
            });
    }

    pub fn add_local_root_descriptor(&mut self, class: ResourceClass, register_space: u32, register_index: u32) {
        self.local_root_signature
            .push(LocalRootSignatureEntry::Descriptor {
                class,
                register_space,
                register_index,
            });
    }

    /// `num_descriptors` may be [`UNBOUNDED_DESCRIPTORS`].
    pub fn add_local_root_descriptor_table(
        &mut self,
        class: ResourceClass,
        register_space: u32,
        register_index: u32,
        num_descriptors: u32,
        offset_in_heap: u32,
    ) {
        self.local_root_signature.push(LocalRootSignatureEntry::Table {
            class,
            register_space,
            register_index,
            num_descriptors,
            offset_in_heap,
        });
    }

    pub fn local_root_signature(&self) -> &[LocalRootSignatureEntry] {
        &self.local_root_signature
    }

    /// Pipeline stage of the module's entry point.
    pub fn get_shader_stage(module: &Module) -> Result<ShaderStage> {
        execution_modes::module_shader_stage(module)
    }

    /// Runs every resource through the binding policy without converting anything, so a caller
    /// can collect the bindings a shader needs.
    pub fn scan_resources(&mut self) -> Result<()> {
        let stage = Self::get_shader_stage(self.module)?;
        resources::scan_resources(&mut *self.remapper, self.module, stage)
    }

    pub fn convert_entry_point(&mut self) -> Result<ConvertedFunction> {
        let module = self.module;
        let mut ctx = ConvertContext::new(
            module,
            &mut *self.remapper,
            &self.options,
            &self.local_root_signature,
        )?;
        debug!(kind = ?ctx.shader_kind, model = ?ctx.execution_model, "converting entry point");

        ctx.builder.set_entry_point(ctx.execution_model, "main");
        if self.options.physical_storage_buffer {
            ctx.builder
                .add_extension("SPV_KHR_physical_storage_buffer");
            ctx.builder
                .add_capability(Capability::PhysicalStorageBufferAddresses);
        }

        ctx.emit_resources_global_mapping()?;
        ctx.analyze_instructions()?;
        ctx.emit_execution_modes()?;
        ctx.emit_resources()?;
        ctx.emit_stage_input_variables()?;
        ctx.emit_stage_output_variables()?;
        ctx.emit_patch_variables()?;
        ctx.emit_global_variables()?;

        let mut pool = CfgNodePool::new();
        let (entry, leaf_functions) = if ctx.shader_kind == ShaderKind::Hull {
            ctx.build_hull_main(&mut pool)?
        } else {
            let entry = ctx.convert_function(&mut pool, ctx.entry.function)?;
            (entry, Vec::new())
        };
        pool.set_entry(entry);
        pool.compute_dominance();
        debug!(nodes = pool.len(), "entry point converted");

        Ok(ConvertedFunction {
            builder: ctx.builder,
            pool,
            entry,
            leaf_functions,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::dxil::{
        MdOperand, Module, Terminator, Type, ENTRY_POINTS_METADATA, SHADER_MODEL_METADATA,
    };

    /// `cs_6_0` module whose `main` is an empty 8x8x1 compute shader.
    pub fn compute_module() -> Module {
        let mut module = Module::new();
        let main = module.add_function("main", Type::Void, vec![]);
        let block = module.add_block(main, "entry");
        module.set_terminator(main, block, Terminator::Ret { value: None });
        let main_value = module.function(main).value;

        let eight = module.const_i32(8);
        let one = module.const_i32(1);
        let threads = module.add_metadata(vec![
            Some(MdOperand::Value(eight)),
            Some(MdOperand::Value(eight)),
            Some(MdOperand::Value(one)),
        ]);
        let num_threads_tag = module.const_i32(4);
        let kind_tag = module.const_i32(8);
        let compute = module.const_i32(5);
        let properties = module.add_metadata(vec![
            Some(MdOperand::Value(num_threads_tag)),
            Some(MdOperand::Node(threads)),
            Some(MdOperand::Value(kind_tag)),
            Some(MdOperand::Value(compute)),
        ]);
        let entry = module.add_metadata(vec![
            Some(MdOperand::Value(main_value)),
            Some(MdOperand::String("main".into())),
            None,
            None,
            Some(MdOperand::Node(properties)),
        ]);
        module.add_named_metadata(ENTRY_POINTS_METADATA, vec![entry]);
        let shader_model = module.add_metadata(vec![Some(MdOperand::String("cs".into()))]);
        module.add_named_metadata(SHADER_MODEL_METADATA, vec![shader_model]);
        module
    }
}
