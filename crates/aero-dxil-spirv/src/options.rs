/// Descriptor placement of root constants when they are read from an inline uniform block
/// instead of push constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineUniformBlock {
    pub descriptor_set: u32,
    pub binding: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterOptions {
    /// Lower `discard` to demote-to-helper instead of calling the discard helper.
    pub shader_demote: bool,
    /// Restrict render-target outputs to indices 0 and 1, one row each, and assign `Index`.
    pub dual_source_blending: bool,
    /// Per render target, two bits per component selecting the source component.
    pub output_swizzles: Vec<u32>,
    pub rasterizer_sample_count: u32,
    /// Expose the sample count as a specialization constant (`SpecId` 0).
    pub rasterizer_sample_count_spec_constant: bool,
    pub inline_ubo: Option<InlineUniformBlock>,
    /// Declare bindless constant buffers as read-only storage buffers.
    pub bindless_cbv_ssbo_emulation: bool,
    /// Use 64-bit physical addresses for root descriptors.
    pub physical_storage_buffer: bool,
    pub sbt_descriptor_size_srv_uav_cbv_log2: u32,
    pub sbt_descriptor_size_sampler_log2: u32,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            shader_demote: false,
            dual_source_blending: false,
            output_swizzles: Vec::new(),
            rasterizer_sample_count: 1,
            rasterizer_sample_count_spec_constant: true,
            inline_ubo: None,
            bindless_cbv_ssbo_emulation: false,
            physical_storage_buffer: false,
            sbt_descriptor_size_srv_uav_cbv_log2: 5,
            sbt_descriptor_size_sampler_log2: 5,
        }
    }
}

/// A single option, for callers that configure the converter one setting at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConverterOption {
    ShaderDemoteToHelper(bool),
    DualSourceBlending(bool),
    OutputSwizzle(Vec<u32>),
    RasterizerSampleCount { count: u32, spec_constant: bool },
    RootConstantInlineUniformBlock(Option<InlineUniformBlock>),
    BindlessCbvSsboEmulation(bool),
    PhysicalStorageBuffer(bool),
    SbtDescriptorSizeLog2 { srv_uav_cbv: u32, sampler: u32 },
}

impl ConverterOptions {
    pub fn apply(&mut self, option: ConverterOption) {
        match option {
            ConverterOption::ShaderDemoteToHelper(v) => self.shader_demote = v,
            ConverterOption::DualSourceBlending(v) => self.dual_source_blending = v,
            ConverterOption::OutputSwizzle(swizzles) => self.output_swizzles = swizzles,
            ConverterOption::RasterizerSampleCount {
                count,
                spec_constant,
            } => {
                self.rasterizer_sample_count = count;
                self.rasterizer_sample_count_spec_constant = spec_constant;
            }
            ConverterOption::RootConstantInlineUniformBlock(ubo) => self.inline_ubo = ubo,
            ConverterOption::BindlessCbvSsboEmulation(v) => self.bindless_cbv_ssbo_emulation = v,
            ConverterOption::PhysicalStorageBuffer(v) => self.physical_storage_buffer = v,
            ConverterOption::SbtDescriptorSizeLog2 {
                srv_uav_cbv,
                sampler,
            } => {
                self.sbt_descriptor_size_srv_uav_cbv_log2 = srv_uav_cbv;
                self.sbt_descriptor_size_sampler_log2 = sampler;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_apply_one_at_a_time() {
        let mut options = ConverterOptions::default();
        options.apply(ConverterOption::RasterizerSampleCount {
            count: 4,
            spec_constant: false,
        });
        options.apply(ConverterOption::RootConstantInlineUniformBlock(Some(
            InlineUniformBlock {
                descriptor_set: 3,
                binding: 1,
            },
        )));
        assert_eq!(options.rasterizer_sample_count, 4);
        assert!(!options.rasterizer_sample_count_spec_constant);
        assert_eq!(options.inline_ubo.map(|u| u.descriptor_set), Some(3));
    }
}
