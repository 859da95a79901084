//! DXIL to SPIR-V translation core.
//!
//! Takes an in-memory [`dxil::Module`], a [`remap::ResourceRemapper`] binding policy and
//! [`options::ConverterOptions`], and produces a control-flow graph of SPIR-V operations plus the
//! module-level declarations a structurizer needs to emit a final binary.
//!
//! ```no_run
//! use aero_dxil_spirv::{dxil::Module, Converter};
//!
//! # fn demo(module: &Module) -> aero_dxil_spirv::Result<()> {
//! let mut converter = Converter::new(module);
//! let converted = converter.convert_entry_point()?;
//! assert!(converted.pool.len() > 0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod cfg;
pub mod convert;
pub mod dxil;
pub mod error;
pub mod options;
pub mod remap;
pub mod spv;

pub use convert::{
    ConvertedFunction, Converter, LeafFunction, LocalRootSignatureEntry, UNBOUNDED_DESCRIPTORS,
};
pub use error::{ConvertError, Result};
pub use options::{ConverterOption, ConverterOptions, InlineUniformBlock};
pub use remap::{IdentityRemapper, ResourceRemapper, ShaderStage};
