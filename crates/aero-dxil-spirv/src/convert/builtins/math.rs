use spirv::{GLOp, Op};

use crate::dxil::{DxOp, Type, ValueId};
use crate::error::{ConvertError, Result};
use crate::spv::Id;

use super::super::context::ConvertContext;
use super::arg;

fn unary_glsl(op: DxOp) -> Option<GLOp> {
    Some(match op {
        DxOp::FAbs => GLOp::FAbs,
        DxOp::Cos => GLOp::Cos,
        DxOp::Sin => GLOp::Sin,
        DxOp::Tan => GLOp::Tan,
        DxOp::Acos => GLOp::Acos,
        DxOp::Asin => GLOp::Asin,
        DxOp::Atan => GLOp::Atan,
        DxOp::Exp => GLOp::Exp2,
        DxOp::Frc => GLOp::Fract,
        DxOp::Log => GLOp::Log2,
        DxOp::Sqrt => GLOp::Sqrt,
        DxOp::Rsqrt => GLOp::InverseSqrt,
        DxOp::RoundNe => GLOp::RoundEven,
        DxOp::RoundNi => GLOp::Floor,
        DxOp::RoundPi => GLOp::Ceil,
        DxOp::RoundZ => GLOp::Trunc,
        _ => return None,
    })
}

fn binary_glsl(op: DxOp) -> Option<GLOp> {
    Some(match op {
        DxOp::FMax => GLOp::NMax,
        DxOp::FMin => GLOp::NMin,
        DxOp::IMax => GLOp::SMax,
        DxOp::IMin => GLOp::SMin,
        DxOp::UMax => GLOp::UMax,
        DxOp::UMin => GLOp::UMin,
        _ => return None,
    })
}

/// Bit pattern of 1.0 in the given float type.
fn float_one_bits(ty: &Type) -> Result<u64> {
    match ty {
        Type::Half => Ok(u64::from(half::f16::ONE.to_bits())),
        Type::Float => Ok(u64::from(1.0f32.to_bits())),
        Type::Double => Ok(1.0f64.to_bits()),
        other => Err(ConvertError::malformed(format!("saturate of {other}"))),
    }
}

impl ConvertContext<'_> {
    fn operand_ids(&mut self, args: &[ValueId], range: std::ops::Range<usize>) -> Result<Vec<Id>> {
        range
            .map(|i| arg(args, i).and_then(|v| self.get_id_for_value(v)))
            .collect()
    }

    pub(super) fn emit_math(&mut self, result: ValueId, op: DxOp, args: &[ValueId]) -> Result<()> {
        let result_type = self.get_type_id_for_value(result)?;

        if let Some(glsl) = unary_glsl(op) {
            let x = self.get_id_for_value(arg(args, 1)?)?;
            let id = self.emit_glsl(glsl, result_type, &[x]);
            return self.define_value(result, id);
        }
        if let Some(glsl) = binary_glsl(op) {
            let operands = self.operand_ids(args, 1..3)?;
            let id = self.emit_glsl(glsl, result_type, &operands);
            return self.define_value(result, id);
        }

        match op {
            DxOp::Saturate => {
                let one_bits = float_one_bits(self.module.value_type(result))?;
                let x = self.get_id_for_value(arg(args, 1)?)?;
                let zero = self.splat_constant(result_type, 0);
                let one = self.splat_constant(result_type, one_bits);
                let id = self.emit_glsl(GLOp::NClamp, result_type, &[x, zero, one]);
                self.define_value(result, id)
            }
            DxOp::IsNaN | DxOp::IsInf | DxOp::Bfrev | DxOp::Countbits => {
                let spv_op = match op {
                    DxOp::IsNaN => Op::IsNan,
                    DxOp::IsInf => Op::IsInf,
                    DxOp::Bfrev => Op::BitReverse,
                    _ => Op::BitCount,
                };
                let x = self.get_id_for_value(arg(args, 1)?)?;
                self.emit_for(spv_op, result, &[x]).map(drop)
            }
            DxOp::FMad | DxOp::IMad | DxOp::UMad => {
                let operands = self.operand_ids(args, 1..4)?;
                let (mul, add) = if op == DxOp::FMad {
                    (Op::FMul, Op::FAdd)
                } else {
                    (Op::IMul, Op::IAdd)
                };
                let product = self.emit(mul, result_type, &operands[..2]);
                self.emit_for(add, result, &[product, operands[2]]).map(drop)
            }
            DxOp::Fma => {
                let operands = self.operand_ids(args, 1..4)?;
                let id = self.emit_glsl(GLOp::Fma, result_type, &operands);
                self.define_value(result, id)
            }
            DxOp::Dot2 | DxOp::Dot3 | DxOp::Dot4 => {
                let n = match op {
                    DxOp::Dot2 => 2,
                    DxOp::Dot3 => 3,
                    _ => 4,
                };
                let a = self.operand_ids(args, 1..1 + n)?;
                let b = self.operand_ids(args, 1 + n..1 + 2 * n)?;
                let a = self.build_vector(result_type, &a);
                let b = self.build_vector(result_type, &b);
                self.emit_for(Op::Dot, result, &[a, b]).map(drop)
            }
            other => Err(ConvertError::unsupported(format!("dx.op {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponentials_are_base_two() {
        assert_eq!(unary_glsl(DxOp::Exp), Some(GLOp::Exp2));
        assert_eq!(unary_glsl(DxOp::Log), Some(GLOp::Log2));
        assert_eq!(unary_glsl(DxOp::RoundNi), Some(GLOp::Floor));
        assert_eq!(unary_glsl(DxOp::FMax), None);
    }

    #[test]
    fn float_min_max_ignore_nans() {
        assert_eq!(binary_glsl(DxOp::FMax), Some(GLOp::NMax));
        assert_eq!(binary_glsl(DxOp::IMin), Some(GLOp::SMin));
    }

    #[test]
    fn saturate_bounds_follow_the_float_width() {
        assert_eq!(float_one_bits(&Type::Half), Ok(0x3c00));
        assert_eq!(float_one_bits(&Type::Float), Ok(0x3f80_0000));
        assert!(float_one_bits(&Type::Int(32)).is_err());
    }
}
