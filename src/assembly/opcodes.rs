//! CIL opcode table.
//!
//! Each opcode carries its encoding, operand type, control-flow classification and the
//! number of stack values it pops and pushes. Opcodes whose stack effect depends on a
//! signature (calls, `ret`) are marked [`StackEffect::Variable`] and must go through the
//! dedicated assembler entry points.
//!
//! Only the subset of ECMA-335 the code generator can produce is listed; prefixes
//! (`tail.`, `volatile.`, `constrained.`) and debugger-only opcodes are not.

use std::fmt;

use strum::EnumIter;

use crate::assembly::{FlowType, OperandType};

/// Number of stack slots an opcode pops or pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    /// Statically known count
    Fixed(u8),
    /// Depends on the operand (method signature, return type)
    Variable,
}

/// Static description of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Assembler mnemonic
    pub mnemonic: &'static str,
    /// Encoding; values above `0xFF` use the `0xFE` two-byte form
    pub code: u16,
    /// Inline operand
    pub operand: OperandType,
    /// Effect on control flow
    pub flow: FlowType,
    /// Values popped
    pub pops: StackEffect,
    /// Values pushed
    pub pushes: StackEffect,
}

macro_rules! stack_effect {
    (var) => {
        StackEffect::Variable
    };
    ($n:literal) => {
        StackEffect::Fixed($n)
    };
}

macro_rules! define_opcodes {
    ($($variant:ident = $code:literal, $mnemonic:literal, $operand:ident, $flow:ident, $pops:tt, $pushes:tt;)*) => {
        /// A CIL opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
        pub enum Opcode {
            $(
                #[doc = $mnemonic]
                $variant,
            )*
        }

        impl Opcode {
            /// Static information about this opcode
            #[must_use]
            pub const fn info(self) -> OpcodeInfo {
                match self {
                    $(
                        Opcode::$variant => OpcodeInfo {
                            mnemonic: $mnemonic,
                            code: $code,
                            operand: OperandType::$operand,
                            flow: FlowType::$flow,
                            pops: stack_effect!($pops),
                            pushes: stack_effect!($pushes),
                        },
                    )*
                }
            }
        }
    };
}

define_opcodes! {
    Nop = 0x00, "nop", None, Sequential, 0, 0;
    Ldarg0 = 0x02, "ldarg.0", None, Sequential, 0, 1;
    Ldarg1 = 0x03, "ldarg.1", None, Sequential, 0, 1;
    Ldarg2 = 0x04, "ldarg.2", None, Sequential, 0, 1;
    Ldarg3 = 0x05, "ldarg.3", None, Sequential, 0, 1;
    Ldloc0 = 0x06, "ldloc.0", None, Sequential, 0, 1;
    Ldloc1 = 0x07, "ldloc.1", None, Sequential, 0, 1;
    Ldloc2 = 0x08, "ldloc.2", None, Sequential, 0, 1;
    Ldloc3 = 0x09, "ldloc.3", None, Sequential, 0, 1;
    Stloc0 = 0x0A, "stloc.0", None, Sequential, 1, 0;
    Stloc1 = 0x0B, "stloc.1", None, Sequential, 1, 0;
    Stloc2 = 0x0C, "stloc.2", None, Sequential, 1, 0;
    Stloc3 = 0x0D, "stloc.3", None, Sequential, 1, 0;
    LdargS = 0x0E, "ldarg.s", UInt8, Sequential, 0, 1;
    LdargaS = 0x0F, "ldarga.s", UInt8, Sequential, 0, 1;
    StargS = 0x10, "starg.s", UInt8, Sequential, 1, 0;
    LdlocS = 0x11, "ldloc.s", UInt8, Sequential, 0, 1;
    LdlocaS = 0x12, "ldloca.s", UInt8, Sequential, 0, 1;
    StlocS = 0x13, "stloc.s", UInt8, Sequential, 1, 0;
    Ldnull = 0x14, "ldnull", None, Sequential, 0, 1;
    LdcI4M1 = 0x15, "ldc.i4.m1", None, Sequential, 0, 1;
    LdcI4_0 = 0x16, "ldc.i4.0", None, Sequential, 0, 1;
    LdcI4_1 = 0x17, "ldc.i4.1", None, Sequential, 0, 1;
    LdcI4_2 = 0x18, "ldc.i4.2", None, Sequential, 0, 1;
    LdcI4_3 = 0x19, "ldc.i4.3", None, Sequential, 0, 1;
    LdcI4_4 = 0x1A, "ldc.i4.4", None, Sequential, 0, 1;
    LdcI4_5 = 0x1B, "ldc.i4.5", None, Sequential, 0, 1;
    LdcI4_6 = 0x1C, "ldc.i4.6", None, Sequential, 0, 1;
    LdcI4_7 = 0x1D, "ldc.i4.7", None, Sequential, 0, 1;
    LdcI4_8 = 0x1E, "ldc.i4.8", None, Sequential, 0, 1;
    LdcI4S = 0x1F, "ldc.i4.s", Int8, Sequential, 0, 1;
    LdcI4 = 0x20, "ldc.i4", Int32, Sequential, 0, 1;
    LdcI8 = 0x21, "ldc.i8", Int64, Sequential, 0, 1;
    LdcR4 = 0x22, "ldc.r4", Float32, Sequential, 0, 1;
    LdcR8 = 0x23, "ldc.r8", Float64, Sequential, 0, 1;
    Dup = 0x25, "dup", None, Sequential, 1, 2;
    Pop = 0x26, "pop", None, Sequential, 1, 0;
    Call = 0x28, "call", Token, Call, var, var;
    Ret = 0x2A, "ret", None, Return, var, 0;
    BrS = 0x2B, "br.s", Int8, UnconditionalBranch, 0, 0;
    BrfalseS = 0x2C, "brfalse.s", Int8, ConditionalBranch, 1, 0;
    BrtrueS = 0x2D, "brtrue.s", Int8, ConditionalBranch, 1, 0;
    BeqS = 0x2E, "beq.s", Int8, ConditionalBranch, 2, 0;
    BgeS = 0x2F, "bge.s", Int8, ConditionalBranch, 2, 0;
    BgtS = 0x30, "bgt.s", Int8, ConditionalBranch, 2, 0;
    BleS = 0x31, "ble.s", Int8, ConditionalBranch, 2, 0;
    BltS = 0x32, "blt.s", Int8, ConditionalBranch, 2, 0;
    BneUnS = 0x33, "bne.un.s", Int8, ConditionalBranch, 2, 0;
    BgeUnS = 0x34, "bge.un.s", Int8, ConditionalBranch, 2, 0;
    BgtUnS = 0x35, "bgt.un.s", Int8, ConditionalBranch, 2, 0;
    BleUnS = 0x36, "ble.un.s", Int8, ConditionalBranch, 2, 0;
    BltUnS = 0x37, "blt.un.s", Int8, ConditionalBranch, 2, 0;
    Br = 0x38, "br", Int32, UnconditionalBranch, 0, 0;
    Brfalse = 0x39, "brfalse", Int32, ConditionalBranch, 1, 0;
    Brtrue = 0x3A, "brtrue", Int32, ConditionalBranch, 1, 0;
    Beq = 0x3B, "beq", Int32, ConditionalBranch, 2, 0;
    Bge = 0x3C, "bge", Int32, ConditionalBranch, 2, 0;
    Bgt = 0x3D, "bgt", Int32, ConditionalBranch, 2, 0;
    Ble = 0x3E, "ble", Int32, ConditionalBranch, 2, 0;
    Blt = 0x3F, "blt", Int32, ConditionalBranch, 2, 0;
    BneUn = 0x40, "bne.un", Int32, ConditionalBranch, 2, 0;
    BgeUn = 0x41, "bge.un", Int32, ConditionalBranch, 2, 0;
    BgtUn = 0x42, "bgt.un", Int32, ConditionalBranch, 2, 0;
    BleUn = 0x43, "ble.un", Int32, ConditionalBranch, 2, 0;
    BltUn = 0x44, "blt.un", Int32, ConditionalBranch, 2, 0;
    Switch = 0x45, "switch", Switch, Switch, 1, 0;
    LdindI1 = 0x46, "ldind.i1", None, Sequential, 1, 1;
    LdindU1 = 0x47, "ldind.u1", None, Sequential, 1, 1;
    LdindI2 = 0x48, "ldind.i2", None, Sequential, 1, 1;
    LdindU2 = 0x49, "ldind.u2", None, Sequential, 1, 1;
    LdindI4 = 0x4A, "ldind.i4", None, Sequential, 1, 1;
    LdindU4 = 0x4B, "ldind.u4", None, Sequential, 1, 1;
    LdindI8 = 0x4C, "ldind.i8", None, Sequential, 1, 1;
    LdindI = 0x4D, "ldind.i", None, Sequential, 1, 1;
    LdindR4 = 0x4E, "ldind.r4", None, Sequential, 1, 1;
    LdindR8 = 0x4F, "ldind.r8", None, Sequential, 1, 1;
    LdindRef = 0x50, "ldind.ref", None, Sequential, 1, 1;
    StindRef = 0x51, "stind.ref", None, Sequential, 2, 0;
    StindI1 = 0x52, "stind.i1", None, Sequential, 2, 0;
    StindI2 = 0x53, "stind.i2", None, Sequential, 2, 0;
    StindI4 = 0x54, "stind.i4", None, Sequential, 2, 0;
    StindI8 = 0x55, "stind.i8", None, Sequential, 2, 0;
    StindR4 = 0x56, "stind.r4", None, Sequential, 2, 0;
    StindR8 = 0x57, "stind.r8", None, Sequential, 2, 0;
    Add = 0x58, "add", None, Sequential, 2, 1;
    Sub = 0x59, "sub", None, Sequential, 2, 1;
    Mul = 0x5A, "mul", None, Sequential, 2, 1;
    Div = 0x5B, "div", None, Sequential, 2, 1;
    DivUn = 0x5C, "div.un", None, Sequential, 2, 1;
    Rem = 0x5D, "rem", None, Sequential, 2, 1;
    RemUn = 0x5E, "rem.un", None, Sequential, 2, 1;
    And = 0x5F, "and", None, Sequential, 2, 1;
    Or = 0x60, "or", None, Sequential, 2, 1;
    Xor = 0x61, "xor", None, Sequential, 2, 1;
    Shl = 0x62, "shl", None, Sequential, 2, 1;
    Shr = 0x63, "shr", None, Sequential, 2, 1;
    ShrUn = 0x64, "shr.un", None, Sequential, 2, 1;
    Neg = 0x65, "neg", None, Sequential, 1, 1;
    Not = 0x66, "not", None, Sequential, 1, 1;
    ConvI1 = 0x67, "conv.i1", None, Sequential, 1, 1;
    ConvI2 = 0x68, "conv.i2", None, Sequential, 1, 1;
    ConvI4 = 0x69, "conv.i4", None, Sequential, 1, 1;
    ConvI8 = 0x6A, "conv.i8", None, Sequential, 1, 1;
    ConvR4 = 0x6B, "conv.r4", None, Sequential, 1, 1;
    ConvR8 = 0x6C, "conv.r8", None, Sequential, 1, 1;
    ConvU4 = 0x6D, "conv.u4", None, Sequential, 1, 1;
    ConvU8 = 0x6E, "conv.u8", None, Sequential, 1, 1;
    Callvirt = 0x6F, "callvirt", Token, Call, var, var;
    Ldobj = 0x71, "ldobj", Token, Sequential, 1, 1;
    Ldstr = 0x72, "ldstr", Token, Sequential, 0, 1;
    Newobj = 0x73, "newobj", Token, Call, var, 1;
    Castclass = 0x74, "castclass", Token, Sequential, 1, 1;
    Isinst = 0x75, "isinst", Token, Sequential, 1, 1;
    ConvRUn = 0x76, "conv.r.un", None, Sequential, 1, 1;
    Unbox = 0x79, "unbox", Token, Sequential, 1, 1;
    Throw = 0x7A, "throw", None, Throw, 1, 0;
    Ldfld = 0x7B, "ldfld", Token, Sequential, 1, 1;
    Ldflda = 0x7C, "ldflda", Token, Sequential, 1, 1;
    Stfld = 0x7D, "stfld", Token, Sequential, 2, 0;
    Ldsfld = 0x7E, "ldsfld", Token, Sequential, 0, 1;
    Ldsflda = 0x7F, "ldsflda", Token, Sequential, 0, 1;
    Stsfld = 0x80, "stsfld", Token, Sequential, 1, 0;
    Stobj = 0x81, "stobj", Token, Sequential, 2, 0;
    ConvOvfI1Un = 0x82, "conv.ovf.i1.un", None, Sequential, 1, 1;
    ConvOvfI2Un = 0x83, "conv.ovf.i2.un", None, Sequential, 1, 1;
    ConvOvfI4Un = 0x84, "conv.ovf.i4.un", None, Sequential, 1, 1;
    ConvOvfI8Un = 0x85, "conv.ovf.i8.un", None, Sequential, 1, 1;
    ConvOvfU1Un = 0x86, "conv.ovf.u1.un", None, Sequential, 1, 1;
    ConvOvfU2Un = 0x87, "conv.ovf.u2.un", None, Sequential, 1, 1;
    ConvOvfU4Un = 0x88, "conv.ovf.u4.un", None, Sequential, 1, 1;
    ConvOvfU8Un = 0x89, "conv.ovf.u8.un", None, Sequential, 1, 1;
    ConvOvfIUn = 0x8A, "conv.ovf.i.un", None, Sequential, 1, 1;
    ConvOvfUUn = 0x8B, "conv.ovf.u.un", None, Sequential, 1, 1;
    Box = 0x8C, "box", Token, Sequential, 1, 1;
    Newarr = 0x8D, "newarr", Token, Sequential, 1, 1;
    Ldlen = 0x8E, "ldlen", None, Sequential, 1, 1;
    Ldelema = 0x8F, "ldelema", Token, Sequential, 2, 1;
    LdelemI1 = 0x90, "ldelem.i1", None, Sequential, 2, 1;
    LdelemU1 = 0x91, "ldelem.u1", None, Sequential, 2, 1;
    LdelemI2 = 0x92, "ldelem.i2", None, Sequential, 2, 1;
    LdelemU2 = 0x93, "ldelem.u2", None, Sequential, 2, 1;
    LdelemI4 = 0x94, "ldelem.i4", None, Sequential, 2, 1;
    LdelemU4 = 0x95, "ldelem.u4", None, Sequential, 2, 1;
    LdelemI8 = 0x96, "ldelem.i8", None, Sequential, 2, 1;
    LdelemI = 0x97, "ldelem.i", None, Sequential, 2, 1;
    LdelemR4 = 0x98, "ldelem.r4", None, Sequential, 2, 1;
    LdelemR8 = 0x99, "ldelem.r8", None, Sequential, 2, 1;
    LdelemRef = 0x9A, "ldelem.ref", None, Sequential, 2, 1;
    StelemI = 0x9B, "stelem.i", None, Sequential, 3, 0;
    StelemI1 = 0x9C, "stelem.i1", None, Sequential, 3, 0;
    StelemI2 = 0x9D, "stelem.i2", None, Sequential, 3, 0;
    StelemI4 = 0x9E, "stelem.i4", None, Sequential, 3, 0;
    StelemI8 = 0x9F, "stelem.i8", None, Sequential, 3, 0;
    StelemR4 = 0xA0, "stelem.r4", None, Sequential, 3, 0;
    StelemR8 = 0xA1, "stelem.r8", None, Sequential, 3, 0;
    StelemRef = 0xA2, "stelem.ref", None, Sequential, 3, 0;
    Ldelem = 0xA3, "ldelem", Token, Sequential, 2, 1;
    Stelem = 0xA4, "stelem", Token, Sequential, 3, 0;
    UnboxAny = 0xA5, "unbox.any", Token, Sequential, 1, 1;
    ConvOvfI1 = 0xB3, "conv.ovf.i1", None, Sequential, 1, 1;
    ConvOvfU1 = 0xB4, "conv.ovf.u1", None, Sequential, 1, 1;
    ConvOvfI2 = 0xB5, "conv.ovf.i2", None, Sequential, 1, 1;
    ConvOvfU2 = 0xB6, "conv.ovf.u2", None, Sequential, 1, 1;
    ConvOvfI4 = 0xB7, "conv.ovf.i4", None, Sequential, 1, 1;
    ConvOvfU4 = 0xB8, "conv.ovf.u4", None, Sequential, 1, 1;
    ConvOvfI8 = 0xB9, "conv.ovf.i8", None, Sequential, 1, 1;
    ConvOvfU8 = 0xBA, "conv.ovf.u8", None, Sequential, 1, 1;
    Ckfinite = 0xC3, "ckfinite", None, Sequential, 1, 1;
    ConvU2 = 0xD1, "conv.u2", None, Sequential, 1, 1;
    ConvU1 = 0xD2, "conv.u1", None, Sequential, 1, 1;
    ConvI = 0xD3, "conv.i", None, Sequential, 1, 1;
    ConvOvfI = 0xD4, "conv.ovf.i", None, Sequential, 1, 1;
    ConvOvfU = 0xD5, "conv.ovf.u", None, Sequential, 1, 1;
    AddOvf = 0xD6, "add.ovf", None, Sequential, 2, 1;
    AddOvfUn = 0xD7, "add.ovf.un", None, Sequential, 2, 1;
    MulOvf = 0xD8, "mul.ovf", None, Sequential, 2, 1;
    MulOvfUn = 0xD9, "mul.ovf.un", None, Sequential, 2, 1;
    SubOvf = 0xDA, "sub.ovf", None, Sequential, 2, 1;
    SubOvfUn = 0xDB, "sub.ovf.un", None, Sequential, 2, 1;
    Endfinally = 0xDC, "endfinally", None, EndFinally, 0, 0;
    Leave = 0xDD, "leave", Int32, Leave, 0, 0;
    LeaveS = 0xDE, "leave.s", Int8, Leave, 0, 0;
    StindI = 0xDF, "stind.i", None, Sequential, 2, 0;
    ConvU = 0xE0, "conv.u", None, Sequential, 1, 1;
    Ceq = 0xFE01, "ceq", None, Sequential, 2, 1;
    Cgt = 0xFE02, "cgt", None, Sequential, 2, 1;
    CgtUn = 0xFE03, "cgt.un", None, Sequential, 2, 1;
    Clt = 0xFE04, "clt", None, Sequential, 2, 1;
    CltUn = 0xFE05, "clt.un", None, Sequential, 2, 1;
    Ldarg = 0xFE09, "ldarg", UInt16, Sequential, 0, 1;
    Ldarga = 0xFE0A, "ldarga", UInt16, Sequential, 0, 1;
    Starg = 0xFE0B, "starg", UInt16, Sequential, 1, 0;
    Ldloc = 0xFE0C, "ldloc", UInt16, Sequential, 0, 1;
    Ldloca = 0xFE0D, "ldloca", UInt16, Sequential, 0, 1;
    Stloc = 0xFE0E, "stloc", UInt16, Sequential, 1, 0;
    Endfilter = 0xFE11, "endfilter", None, EndFinally, 1, 0;
    Initobj = 0xFE15, "initobj", Token, Sequential, 1, 0;
    Rethrow = 0xFE1A, "rethrow", None, Throw, 0, 0;
}

impl Opcode {
    /// Assembler mnemonic
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    /// Size of the opcode itself (1 or 2 bytes, without operand)
    #[must_use]
    pub const fn opcode_size(self) -> u32 {
        if self.info().code > 0xFF {
            2
        } else {
            1
        }
    }

    /// Returns true if control never falls through to the next instruction
    #[must_use]
    pub const fn is_unconditional_exit(self) -> bool {
        matches!(
            self.info().flow,
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::Leave
        )
    }

    /// Returns true for opcodes taking a single branch target
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(
            self.info().flow,
            FlowType::UnconditionalBranch | FlowType::ConditionalBranch | FlowType::Leave
        )
    }

    /// The one-byte displacement variant of a long branch
    #[must_use]
    pub const fn short_form(self) -> Option<Opcode> {
        Some(match self {
            Opcode::Br => Opcode::BrS,
            Opcode::Brfalse => Opcode::BrfalseS,
            Opcode::Brtrue => Opcode::BrtrueS,
            Opcode::Beq => Opcode::BeqS,
            Opcode::Bge => Opcode::BgeS,
            Opcode::Bgt => Opcode::BgtS,
            Opcode::Ble => Opcode::BleS,
            Opcode::Blt => Opcode::BltS,
            Opcode::BneUn => Opcode::BneUnS,
            Opcode::BgeUn => Opcode::BgeUnS,
            Opcode::BgtUn => Opcode::BgtUnS,
            Opcode::BleUn => Opcode::BleUnS,
            Opcode::BltUn => Opcode::BltUnS,
            Opcode::Leave => Opcode::LeaveS,
            _ => return None,
        })
    }

    /// The four-byte displacement variant of a short branch
    #[must_use]
    pub const fn long_form(self) -> Option<Opcode> {
        Some(match self {
            Opcode::BrS => Opcode::Br,
            Opcode::BrfalseS => Opcode::Brfalse,
            Opcode::BrtrueS => Opcode::Brtrue,
            Opcode::BeqS => Opcode::Beq,
            Opcode::BgeS => Opcode::Bge,
            Opcode::BgtS => Opcode::Bgt,
            Opcode::BleS => Opcode::Ble,
            Opcode::BltS => Opcode::Blt,
            Opcode::BneUnS => Opcode::BneUn,
            Opcode::BgeUnS => Opcode::BgeUn,
            Opcode::BgtUnS => Opcode::BgtUn,
            Opcode::BleUnS => Opcode::BleUn,
            Opcode::BltUnS => Opcode::BltUn,
            Opcode::LeaveS => Opcode::Leave,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
