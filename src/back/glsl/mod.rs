/*!
Generic GLSL-family emission scaffold.

The MSL backend specializes a family of C-like shader dialects that all share
expression syntax, opcode traversal and structured control flow. That shared
behavior lives here: the [`Backend`] trait names the dispatch points a
dialect may override, and the `base_*` functions carry the family-wide
default behavior. A dialect overrides a trait method when it needs different
output and delegates back to the matching `base_*` function for everything
else, so "call the base" is always an explicit, visible call.

State shared by the family lives in [`EmitState`]; the dialect-specific
writer owns one and hands out access through the trait's accessor methods.
*/

use crate::{
    arena::{Id, IdSet},
    back::msl::Error,
    ArraySize, BaseType, Entity, Instruction, Merge, Module, ScalarValue, Terminator, Type,
};

/// Syntax switches that differ between members of the GLSL family.
#[derive(Clone, Debug)]
pub struct Dialect {
    pub float_literal_suffix: bool,
    pub uint32_literal_suffix: bool,
    pub basic_int_type: &'static str,
    pub basic_uint_type: &'static str,
    pub discard_literal: &'static str,
    pub swizzle_is_function: bool,
    pub use_initializer_list: bool,
    pub native_row_major_matrix: bool,
    pub force_temp_use_for_two_vector_shuffles: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect {
            float_literal_suffix: false,
            uint32_literal_suffix: true,
            basic_int_type: "int",
            basic_uint_type: "uint",
            discard_literal: "discard",
            swizzle_is_function: false,
            use_initializer_list: false,
            native_row_major_matrix: true,
            force_temp_use_for_two_vector_shuffles: false,
        }
    }
}

/// Emission state shared between the scaffold and the dialect writer.
///
/// The driver loop rebuilds this for every pass; only the dialect's own
/// registries survive a retry.
#[derive(Default)]
pub struct EmitState {
    pub buffer: String,
    pub indent: u32,
    pub dialect: Dialect,
    /// Function currently being emitted, [`Id::NONE`] outside functions.
    pub current_function: Id,
    pub processing_entry_point: bool,
    /// Results that must become named temporaries instead of being inlined.
    pub forced_temporaries: IdSet,
    pub emitted_functions: IdSet,
    /// `(merge, continue)` targets of the enclosing loops.
    pub loop_stack: Vec<(Id, Id)>,
    /// Set when emission discovered something that invalidates already
    /// printed output; the driver reruns the pass.
    pub force_recompile: bool,
}

/// Sampling operands gathered from an image instruction, [`Id::NONE`] where
/// absent.
#[derive(Clone, Copy, Default)]
pub struct TexArgs {
    pub coord: Id,
    pub dref: Id,
    pub grad_x: Id,
    pub grad_y: Id,
    pub lod: Id,
    pub const_offset: Id,
    pub offset: Id,
    pub bias: Id,
    pub component: Id,
    pub sample: Id,
}

/// The dispatch interface between the generic scaffold and a dialect.
///
/// Methods with a default body are the GLSL-family behavior; a dialect
/// overrides them and calls the corresponding `base_*` function to fall
/// through. Methods without a default are inherently dialect-specific.
pub trait Backend: Sized {
    fn module(&self) -> &Module;
    fn module_mut(&mut self) -> &mut Module;
    fn state(&self) -> &EmitState;
    fn state_mut(&mut self) -> &mut EmitState;

    fn emit_instruction(&mut self, inst: &Instruction) -> Result<(), Error> {
        base_emit_instruction(self, inst)
    }

    fn emit_glsl_op(&mut self, result_type: Id, id: Id, op: u32, args: &[u32]) -> Result<(), Error> {
        base_emit_glsl_op(self, result_type, id, op, args)
    }

    /// Name of the sampling function for an image operation, including the
    /// receiver (`tex.sample`, `texture`, …).
    fn to_function_name(
        &mut self,
        img: Id,
        is_fetch: bool,
        is_gather: bool,
        has_dref: bool,
    ) -> Result<String, Error>;

    /// Argument list of the sampling function named by `to_function_name`.
    fn to_function_args(
        &mut self,
        img: Id,
        is_fetch: bool,
        is_gather: bool,
        is_proj: bool,
        args: &TexArgs,
        forward: &mut bool,
    ) -> Result<String, Error>;

    fn type_to_glsl(&self, ty: &Type, id: Id) -> String;

    /// The cast operation for an `OpBitcast` between these types, or `None`
    /// when a plain constructor cast preserves the bits.
    fn bitcast_op(&self, out_ty: &Type, in_ty: &Type) -> Option<String>;

    fn builtin_to_name(&self, builtin: spirv::BuiltIn, storage: spirv::StorageClass) -> String {
        base_builtin_to_name(builtin, storage)
    }

    /// The `[[…]]` attribute of a builtin on an entry-point interface.
    fn builtin_qualifier(&self, builtin: spirv::BuiltIn) -> Result<&'static str, Error>;

    /// Address-space qualifier of a function argument.
    fn argument_address_space(&self, var_id: Id) -> &'static str;

    /// The attribute qualifier of a struct member, `""` when none applies.
    fn member_attribute_qualifier(&self, ty: &Type, index: u32) -> Result<String, Error>;

    fn emit_function_prototype(&mut self, func_id: Id) -> Result<(), Error>;

    fn to_name(&self, id: Id) -> String {
        base_to_name(self, id)
    }

    fn to_func_call_arg(&mut self, id: Id) -> Result<String, Error> {
        to_expression(self, id)
    }

    /// Bind a sampler to a sampled-image expression.
    fn emit_sampled_image_op(
        &mut self,
        result_type: Id,
        id: Id,
        image: Id,
        sampler: Id,
    ) -> Result<(), Error> {
        let text = to_expression(self, image)?;
        let base_variable = self.module().backing_variable_id(image);
        self.module_mut().set_expression(
            id,
            crate::Expression {
                text,
                expression_type: result_type,
                immutable: true,
                need_transpose: false,
                packed: false,
                base_variable,
            },
        );
        self.module_mut().meta_mut(id).sampler = sampler;
        Ok(())
    }

    /// Wrap `expr` so a row-major matrix reads as column-major.
    fn convert_row_major_matrix(&mut self, expr: String, _ty: &Type) -> Result<String, Error> {
        Ok(format!("transpose({expr})"))
    }

    /// Called when a row-major matrix is about to be read, so the dialect
    /// can register any conversion helper it needs.
    fn prepare_row_major_conversion(&mut self, _columns: u32, _vecsize: u32) -> Result<(), Error> {
        Ok(())
    }

    /// Convert a packed member access back to the unpacked type.
    fn unpack_expression(&self, expr: String, _ty: &Type) -> String {
        expr
    }

    /// Storage qualifiers preceding a local variable declaration.
    fn variable_qualifiers(&self, _var_id: Id) -> &'static str {
        ""
    }

    /// Adjustments emitted at the end of the entry function body.
    fn emit_fixup(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Append one indented line to the output.
pub fn statement<B: Backend>(b: &mut B, line: impl AsRef<str>) {
    let state = b.state_mut();
    for _ in 0..state.indent {
        state.buffer.push_str(crate::back::INDENT);
    }
    state.buffer.push_str(line.as_ref());
    state.buffer.push('\n');
}

pub fn begin_scope<B: Backend>(b: &mut B) {
    statement(b, "{");
    b.state_mut().indent += 1;
}

pub fn end_scope<B: Backend>(b: &mut B) {
    b.state_mut().indent -= 1;
    statement(b, "}");
}

pub fn end_scope_decl<B: Backend>(b: &mut B) {
    b.state_mut().indent -= 1;
    statement(b, "};");
}

/// The name an ID prints as: its alias when it has one, a positional
/// placeholder otherwise.
pub fn base_to_name<B: Backend>(b: &B, id: Id) -> String {
    let alias = b.module().name(id);
    if alias.is_empty() {
        format!("_{}", id.0)
    } else {
        alias.to_string()
    }
}

/// Render `id` as an MSL expression usable at the current point.
pub fn to_expression<B: Backend>(b: &mut B, id: Id) -> Result<String, Error> {
    match *b.module().entity(id) {
        Entity::Variable(ref var) => {
            // A qualified alias (a flattened interface member) wins;
            // otherwise builtins print their canonical names.
            let name = b.to_name(id);
            if name != base_to_name(b, id) {
                return Ok(name);
            }
            let dec = &b.module().meta(id).decoration;
            if dec.flags.contains(crate::DecorationFlags::BUILTIN) {
                if let Some(builtin) = dec.builtin {
                    return Ok(b.builtin_to_name(builtin, var.storage));
                }
            }
            Ok(name)
        }
        Entity::Undef(_) => Ok(b.to_name(id)),
        Entity::Constant(ref c) => {
            if c.specialization {
                Ok(b.to_name(id))
            } else {
                let c = c.clone();
                constant_expression(b, &c)
            }
        }
        Entity::Expression(ref expr) => {
            if expr.need_transpose {
                let text = expr.text.clone();
                let ty = b.module().ty(expr.expression_type).clone();
                let value_ty = b.module().ty(ty.self_id).clone();
                b.convert_row_major_matrix(text, &value_ty)
            } else {
                Ok(expr.text.clone())
            }
        }
        ref other => unreachable!("{id} is {other:?}, which has no expression form"),
    }
}

/// Like [`to_expression`], parenthesized when the expression could bind
/// differently inside a larger one.
pub fn to_enclosed_expression<B: Backend>(b: &mut B, id: Id) -> Result<String, Error> {
    let text = to_expression(b, id)?;
    Ok(enclose(text))
}

pub fn enclose(text: String) -> String {
    if needs_enclosing(&text) {
        format!("({text})")
    } else {
        text
    }
}

fn needs_enclosing(text: &str) -> bool {
    let mut depth = 0u32;
    for (i, ch) in text.chars().enumerate() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ' ' | '?' if depth == 0 => return true,
            '-' if depth == 0 && i > 0 => return true,
            _ => {}
        }
    }
    false
}

fn format_float(value: f64, suffix: bool) -> String {
    let mut text = format!("{value:?}");
    if text.ends_with("inf") || text.ends_with("NaN") {
        // Fold non-finite literals through a bit pattern the target compiler
        // accepts.
        text = if value.is_nan() {
            "(0.0 / 0.0)".to_string()
        } else if value > 0.0 {
            "(1.0 / 0.0)".to_string()
        } else {
            "(-1.0 / 0.0)".to_string()
        };
        return text;
    }
    if suffix {
        text.push('f');
    }
    text
}

/// The literal or constructor expression of a constant.
pub fn constant_expression<B: Backend>(b: &mut B, c: &crate::Constant) -> Result<String, Error> {
    let ty = b.module().ty(c.constant_type).clone();
    if !c.subconstants.is_empty() {
        let mut parts = Vec::with_capacity(c.subconstants.len());
        for &sub in &c.subconstants {
            parts.push(to_expression(b, sub)?);
        }
        let joined = parts.join(", ");
        return Ok(if ty.is_array() || ty.base == BaseType::Struct {
            format!("{{{joined}}}")
        } else {
            format!("{}({})", b.type_to_glsl(&ty, Id::NONE), joined)
        });
    }
    let dialect = &b.state().dialect;
    let text = match c.value {
        ScalarValue::Bool(v) => if v { "true" } else { "false" }.to_string(),
        ScalarValue::Sint(v) => format!("{v}"),
        ScalarValue::Uint(v) => {
            if dialect.uint32_literal_suffix && ty.width <= 32 {
                format!("{v}u")
            } else {
                format!("{v}")
            }
        }
        ScalarValue::Float(v) => format_float(v, dialect.float_literal_suffix),
    };
    Ok(text)
}

/// `[N]`-style array dimension suffix of a declaration.
pub fn type_to_array_glsl<B: Backend>(b: &mut B, ty: &Type) -> Result<String, Error> {
    let mut text = String::new();
    for index in (0..ty.array.len()).rev() {
        let size = to_array_size(b, ty, index)?;
        text.push('[');
        text.push_str(&size);
        text.push(']');
    }
    Ok(text)
}

pub fn to_array_size<B: Backend>(b: &mut B, ty: &Type, dimension: usize) -> Result<String, Error> {
    match ty.array[dimension] {
        ArraySize::Literal(n) => Ok(format!("{n}")),
        ArraySize::Constant(id) => to_expression(b, id),
    }
}

/// `<type> <name>` declaration fragment, with any array suffix.
pub fn variable_decl<B: Backend>(b: &mut B, ty: &Type, name: &str, id: Id) -> Result<String, Error> {
    let type_name = b.type_to_glsl(ty, id);
    let array_suffix = type_to_array_glsl(b, ty)?;
    Ok(format!("{type_name} {name}{array_suffix}"))
}

/// Bind the result of an instruction: either inline it as an expression or
/// spill it into a named temporary.
pub fn emit_op<B: Backend>(
    b: &mut B,
    result_type: Id,
    id: Id,
    rhs: String,
    forwarding: bool,
) -> Result<(), Error> {
    let forward = forwarding && !b.state().forced_temporaries.contains(id);
    let (text, immutable) = if forward {
        (rhs, true)
    } else {
        let ty = b.module().ty(result_type).clone();
        let name = b.to_name(id);
        let decl = variable_decl(b, &ty, &name, id)?;
        statement(b, format!("{decl} = {rhs};"));
        (name, false)
    };
    b.module_mut().set_expression(
        id,
        crate::Expression {
            text,
            expression_type: result_type,
            immutable,
            need_transpose: false,
            packed: false,
            base_variable: Id::NONE,
        },
    );
    Ok(())
}

pub fn should_forward<B: Backend>(b: &B, id: Id) -> bool {
    !b.state().forced_temporaries.contains(id)
}

pub fn emit_unary_op<B: Backend>(
    b: &mut B,
    result_type: Id,
    id: Id,
    op0: Id,
    op: &str,
) -> Result<(), Error> {
    let e0 = to_enclosed_expression(b, op0)?;
    emit_op(b, result_type, id, format!("{op}{e0}"), should_forward(b, op0))
}

pub fn emit_binary_op<B: Backend>(
    b: &mut B,
    result_type: Id,
    id: Id,
    op0: Id,
    op1: Id,
    op: &str,
) -> Result<(), Error> {
    let e0 = to_enclosed_expression(b, op0)?;
    let e1 = to_enclosed_expression(b, op1)?;
    let forward = should_forward(b, op0) && should_forward(b, op1);
    emit_op(b, result_type, id, format!("{e0} {op} {e1}"), forward)
}

/// Binary operator whose operands must agree in signedness; operands whose
/// base type disagrees with `expected` are constructor-cast to it.
pub fn emit_binary_op_cast<B: Backend>(
    b: &mut B,
    result_type: Id,
    id: Id,
    op0: Id,
    op1: Id,
    op: &str,
    expected: Option<BaseType>,
) -> Result<(), Error> {
    let (e0, e1) = match expected {
        Some(base) => (
            cast_to_base(b, op0, base)?,
            cast_to_base(b, op1, base)?,
        ),
        None => (to_enclosed_expression(b, op0)?, to_enclosed_expression(b, op1)?),
    };
    let forward = should_forward(b, op0) && should_forward(b, op1);
    emit_op(b, result_type, id, format!("{e0} {op} {e1}"), forward)
}

fn cast_to_base<B: Backend>(b: &mut B, id: Id, base: BaseType) -> Result<String, Error> {
    let ty = {
        let source = b.module().expression_type(id);
        let source = b.module().ty(source.self_id);
        if source.base == base {
            return to_enclosed_expression(b, id);
        }
        Type::vector(base, source.width, source.vecsize)
    };
    let inner = to_expression(b, id)?;
    Ok(format!("{}({})", b.type_to_glsl(&ty, Id::NONE), inner))
}

pub fn emit_nary_func_op<B: Backend>(
    b: &mut B,
    result_type: Id,
    id: Id,
    operands: &[Id],
    fname: &str,
) -> Result<(), Error> {
    let mut args = Vec::with_capacity(operands.len());
    let mut forward = true;
    for &operand in operands {
        forward &= should_forward(b, operand);
        args.push(to_expression(b, operand)?);
    }
    emit_op(b, result_type, id, format!("{fname}({})", args.join(", ")), forward)
}

pub fn emit_unary_func_op<B: Backend>(
    b: &mut B,
    result_type: Id,
    id: Id,
    op0: Id,
    fname: &str,
) -> Result<(), Error> {
    emit_nary_func_op(b, result_type, id, &[op0], fname)
}

pub fn emit_binary_func_op<B: Backend>(
    b: &mut B,
    result_type: Id,
    id: Id,
    op0: Id,
    op1: Id,
    fname: &str,
) -> Result<(), Error> {
    emit_nary_func_op(b, result_type, id, &[op0, op1], fname)
}

/// Which integer signedness a sign-sensitive opcode expects of its
/// operands, when it expects one at all.
const fn binary_cast_type(op: spirv::Op) -> Option<BaseType> {
    use spirv::Op;
    match op {
        Op::UDiv
        | Op::UMod
        | Op::UGreaterThan
        | Op::UGreaterThanEqual
        | Op::ULessThan
        | Op::ULessThanEqual
        | Op::ShiftRightLogical => Some(BaseType::UInt),
        Op::SDiv
        | Op::SRem
        | Op::SMod
        | Op::SGreaterThan
        | Op::SGreaterThanEqual
        | Op::SLessThan
        | Op::SLessThanEqual
        | Op::ShiftRightArithmetic => Some(BaseType::Int),
        _ => None,
    }
}

/// GLSL-family handling of one instruction. Dialects fall through to this
/// for every opcode they do not rewrite.
pub fn base_emit_instruction<B: Backend>(b: &mut B, inst: &Instruction) -> Result<(), Error> {
    use spirv::Op;

    let ops = &inst.operands;
    let typed = |index: usize| (Id(ops[0]), Id(ops[1]), Id(ops[index]));

    match inst.op {
        Op::Load => {
            let (result_type, id, ptr) = typed(2);
            base_emit_load(b, result_type, id, ptr)
        }
        Op::Store => {
            let lhs = to_expression(b, Id(ops[0]))?;
            let rhs = to_expression(b, Id(ops[1]))?;
            statement(b, format!("{lhs} = {rhs};"));
            Ok(())
        }
        Op::CopyMemory => {
            let lhs = to_expression(b, Id(ops[0]))?;
            let rhs = to_expression(b, Id(ops[1]))?;
            statement(b, format!("{lhs} = {rhs};"));
            Ok(())
        }
        Op::CopyObject => {
            let (result_type, id, source) = typed(2);
            let text = to_expression(b, source)?;
            emit_op(b, result_type, id, text, true)
        }
        Op::AccessChain | Op::InBoundsAccessChain => base_emit_access_chain(b, inst),
        Op::FunctionCall => base_emit_function_call(b, inst),
        Op::ExtInst => {
            let (result_type, id, set) = typed(2);
            match *b.module().entity(set) {
                Entity::Extension(crate::Extension::GlslStd450) => {
                    b.emit_glsl_op(result_type, id, ops[3], &ops[4..])
                }
                _ => Err(Error::UnsupportedExtInst(ops[3])),
            }
        }

        Op::CompositeConstruct => base_emit_composite_construct(b, inst),
        Op::CompositeExtract => base_emit_composite_extract(b, inst),
        Op::CompositeInsert => base_emit_composite_insert(b, inst),
        Op::VectorShuffle => base_emit_vector_shuffle(b, inst),
        Op::VectorExtractDynamic => {
            let (result_type, id, vec) = typed(2);
            let base = to_enclosed_expression(b, vec)?;
            let index = to_expression(b, Id(ops[3]))?;
            emit_op(b, result_type, id, format!("{base}[{index}]"), true)
        }

        // Arithmetic
        Op::IAdd | Op::FAdd => base_binop(b, ops, "+"),
        Op::ISub | Op::FSub => base_binop(b, ops, "-"),
        Op::IMul | Op::FMul | Op::MatrixTimesScalar | Op::VectorTimesScalar
        | Op::MatrixTimesMatrix | Op::VectorTimesMatrix | Op::MatrixTimesVector => {
            base_binop(b, ops, "*")
        }
        Op::FDiv => base_binop(b, ops, "/"),
        Op::UDiv | Op::SDiv => base_binop_cast(b, inst.op, ops, "/"),
        Op::UMod | Op::SRem | Op::SMod => base_binop_cast(b, inst.op, ops, "%"),
        Op::FRem => {
            let (result_type, id, _) = typed(2);
            emit_binary_func_op(b, result_type, id, Id(ops[2]), Id(ops[3]), "fmod")
        }
        Op::FMod => {
            let (result_type, id, _) = typed(2);
            emit_binary_func_op(b, result_type, id, Id(ops[2]), Id(ops[3]), "mod")
        }
        Op::FNegate | Op::SNegate => {
            let (result_type, id, op0) = typed(2);
            emit_unary_op(b, result_type, id, op0, "-")
        }
        Op::Dot => {
            let (result_type, id, _) = typed(2);
            emit_binary_func_op(b, result_type, id, Id(ops[2]), Id(ops[3]), "dot")
        }
        Op::Transpose => {
            let (result_type, id, op0) = typed(2);
            emit_unary_func_op(b, result_type, id, op0, "transpose")
        }

        // Bit and logic
        Op::Not => {
            let (result_type, id, op0) = typed(2);
            emit_unary_op(b, result_type, id, op0, "~")
        }
        Op::LogicalNot => {
            let (result_type, id, op0) = typed(2);
            emit_unary_op(b, result_type, id, op0, "!")
        }
        Op::BitwiseAnd => base_binop(b, ops, "&"),
        Op::BitwiseOr => base_binop(b, ops, "|"),
        Op::BitwiseXor => base_binop(b, ops, "^"),
        Op::LogicalAnd => base_binop(b, ops, "&&"),
        Op::LogicalOr => base_binop(b, ops, "||"),
        Op::ShiftLeftLogical => base_binop(b, ops, "<<"),
        Op::ShiftRightLogical | Op::ShiftRightArithmetic => {
            base_binop_cast(b, inst.op, ops, ">>")
        }

        Op::Select => {
            let (result_type, id, cond) = typed(2);
            let cond_type = b.module().expression_type(cond).clone();
            let forward =
                should_forward(b, cond) && should_forward(b, Id(ops[3])) && should_forward(b, Id(ops[4]));
            let text = if cond_type.vecsize > 1 {
                let f = to_expression(b, Id(ops[4]))?;
                let t = to_expression(b, Id(ops[3]))?;
                let c = to_expression(b, cond)?;
                format!("select({f}, {t}, {c})")
            } else {
                let c = to_enclosed_expression(b, cond)?;
                let t = to_enclosed_expression(b, Id(ops[3]))?;
                let f = to_enclosed_expression(b, Id(ops[4]))?;
                format!("{c} ? {t} : {f}")
            };
            emit_op(b, result_type, id, text, forward)
        }

        // Conversions
        Op::ConvertFToU | Op::ConvertFToS | Op::ConvertSToF | Op::ConvertUToF | Op::UConvert
        | Op::SConvert | Op::FConvert => {
            let (result_type, id, op0) = typed(2);
            let ty = b.module().ty(result_type).clone();
            let inner = to_expression(b, op0)?;
            let text = format!("{}({})", b.type_to_glsl(&ty, Id::NONE), inner);
            emit_op(b, result_type, id, text, should_forward(b, op0))
        }
        Op::Bitcast => {
            let (result_type, id, op0) = typed(2);
            let out_ty = b.module().ty(result_type).clone();
            let in_ty = {
                let t = b.module().expression_type(op0);
                b.module().ty(t.self_id).clone()
            };
            let inner = to_expression(b, op0)?;
            let text = match b.bitcast_op(&out_ty, &in_ty) {
                Some(cast) => format!("{cast}({inner})"),
                None => format!("{}({})", b.type_to_glsl(&out_ty, Id::NONE), inner),
            };
            emit_op(b, result_type, id, text, should_forward(b, op0))
        }

        // Images
        Op::SampledImage => {
            let (result_type, id, image) = typed(2);
            b.emit_sampled_image_op(result_type, id, image, Id(ops[3]))
        }
        Op::Image => {
            let (result_type, id, sampled) = typed(2);
            let text = to_expression(b, sampled)?;
            let base_variable = b.module().backing_variable_id(sampled);
            b.module_mut().set_expression(
                id,
                crate::Expression {
                    text,
                    expression_type: result_type,
                    immutable: true,
                    need_transpose: false,
                    packed: false,
                    base_variable,
                },
            );
            Ok(())
        }
        Op::ImageSampleImplicitLod
        | Op::ImageSampleExplicitLod
        | Op::ImageSampleDrefImplicitLod
        | Op::ImageSampleDrefExplicitLod
        | Op::ImageSampleProjImplicitLod
        | Op::ImageSampleProjExplicitLod
        | Op::ImageSampleProjDrefImplicitLod
        | Op::ImageSampleProjDrefExplicitLod
        | Op::ImageFetch
        | Op::ImageGather
        | Op::ImageDrefGather => base_emit_texture_op(b, inst),

        // The structured variants are modeled as block terminators; nothing
        // else is expected inside a block.
        Op::Nop | Op::Undef | Op::Variable => Ok(()),

        Op::Phi => Err(Error::UnsupportedOpcode(Op::Phi)),
        Op::OuterProduct => Err(Error::UnsupportedOpcode(Op::OuterProduct)),
        other => Err(Error::UnsupportedOpcode(other)),
    }
}

fn base_binop<B: Backend>(b: &mut B, ops: &[u32], op: &str) -> Result<(), Error> {
    emit_binary_op(b, Id(ops[0]), Id(ops[1]), Id(ops[2]), Id(ops[3]), op)
}

fn base_binop_cast<B: Backend>(
    b: &mut B,
    opcode: spirv::Op,
    ops: &[u32],
    op: &str,
) -> Result<(), Error> {
    emit_binary_op_cast(
        b,
        Id(ops[0]),
        Id(ops[1]),
        Id(ops[2]),
        Id(ops[3]),
        op,
        binary_cast_type(opcode),
    )
}

fn base_emit_load<B: Backend>(b: &mut B, result_type: Id, id: Id, ptr: Id) -> Result<(), Error> {
    // Read the pointer's raw text: any row-major conversion belongs to the
    // loaded value, which keeps the transpose deferrable until use.
    let (text, mut need_transpose, packed, base_variable) = match *b.module().entity(ptr) {
        Entity::Expression(ref e) => (e.text.clone(), e.need_transpose, e.packed, e.base_variable),
        _ => {
            let row_major = !b.state().dialect.native_row_major_matrix
                && b.module().has_decoration(ptr, crate::DecorationFlags::ROW_MAJOR);
            (b.to_name(ptr), row_major, false, b.module().backing_variable_id(ptr))
        }
    };
    let value_ty = b.module().ty(result_type).clone();
    if need_transpose {
        if value_ty.is_matrix() {
            b.prepare_row_major_conversion(value_ty.columns, value_ty.vecsize)?;
        } else {
            need_transpose = false;
        }
    }
    let text = if packed {
        b.unpack_expression(text, &value_ty)
    } else {
        text
    };
    b.module_mut().set_expression(
        id,
        crate::Expression {
            text,
            expression_type: result_type,
            immutable: true,
            need_transpose,
            packed: false,
            base_variable,
        },
    );
    Ok(())
}

/// An index inside an access chain: literal constants print bare, without
/// integer suffixes.
fn index_expression<B: Backend>(b: &mut B, index: Id) -> Result<String, Error> {
    match b.module().try_constant(index) {
        Some(c) if !c.specialization => Ok(format!("{}", c.scalar())),
        _ => to_expression(b, index),
    }
}

fn base_emit_access_chain<B: Backend>(b: &mut B, inst: &Instruction) -> Result<(), Error> {
    let ops = &inst.operands;
    let result_type = Id(ops[0]);
    let id = Id(ops[1]);
    let base = Id(ops[2]);

    let mut text = match *b.module().entity(base) {
        Entity::Expression(ref e) => e.text.clone(),
        _ => b.to_name(base),
    };
    let base_variable = b.module().backing_variable_id(base);
    // `current` walks full type IDs (pointer/array clones included); name
    // and decoration lookups go through the canonical ID.
    let mut current = b.module().expression_type_id(base);
    let mut need_transpose = false;
    let mut packed = false;
    // Remaining array dimensions of `current` not yet consumed by indices.
    let mut array_depth = b.module().ty(current).array.len();

    for &index_word in &ops[3..] {
        let index = Id(index_word);
        let ty = b.module().ty(current).clone();
        if array_depth > 0 {
            let e = index_expression(b, index)?;
            text.push('[');
            text.push_str(&e);
            text.push(']');
            array_depth -= 1;
            continue;
        }
        match ty.base {
            BaseType::Struct => {
                let member = match b.module().try_constant(index) {
                    Some(c) => c.scalar(),
                    None => return Err(Error::ExpectedConstant(index)),
                };
                let canonical = b.module().canonical_type_id(current);
                let member_flags = b.module().combined_member_flags(&ty, member);
                let qualified = b
                    .module()
                    .member_decoration(canonical, member)
                    .map(|dec| dec.qualified_alias.clone())
                    .unwrap_or_default();
                if !qualified.is_empty() {
                    // A flattened interface member: the path is rooted at
                    // the synthesized block, not at the source variable.
                    text = qualified;
                } else {
                    let name = b.module().member_name(canonical, member).to_string();
                    text.push('.');
                    if name.is_empty() {
                        text.push_str(&format!("_m{member}"));
                    } else {
                        text.push_str(&name);
                    }
                }
                if member_flags.contains(crate::DecorationFlags::ROW_MAJOR) {
                    let member_ty = b.module().ty(ty.members[member as usize]).clone();
                    if member_ty.is_matrix() && !b.state().dialect.native_row_major_matrix {
                        need_transpose = true;
                        b.prepare_row_major_conversion(member_ty.columns, member_ty.vecsize)?;
                    }
                }
                packed = member_flags.contains(crate::DecorationFlags::C_PACKED);
                current = ty.members[member as usize];
                array_depth = b.module().ty(current).array.len();
            }
            _ if ty.is_matrix() => {
                let e = index_expression(b, index)?;
                text.push('[');
                text.push_str(&e);
                text.push(']');
            }
            _ if ty.vecsize > 1 => match b.module().try_constant(index) {
                Some(c) => {
                    let component = c.scalar() as usize;
                    if component >= crate::back::COMPONENTS.len() {
                        return Err(Error::InvalidComponentIndex(component as u32));
                    }
                    text.push('.');
                    text.push(crate::back::COMPONENTS[component]);
                }
                None => {
                    let e = index_expression(b, index)?;
                    text.push('[');
                    text.push_str(&e);
                    text.push(']');
                }
            },
            _ => {
                let e = index_expression(b, index)?;
                text.push('[');
                text.push_str(&e);
                text.push(']');
            }
        }
    }

    b.module_mut().set_expression(
        id,
        crate::Expression {
            text,
            expression_type: result_type,
            immutable: true,
            need_transpose,
            packed,
            base_variable,
        },
    );
    Ok(())
}

fn base_emit_function_call<B: Backend>(b: &mut B, inst: &Instruction) -> Result<(), Error> {
    let ops = &inst.operands;
    let result_type = Id(ops[0]);
    let id = Id(ops[1]);
    let func = Id(ops[2]);

    let mut args = Vec::new();
    for &arg in &ops[3..] {
        args.push(b.to_func_call_arg(Id(arg))?);
    }
    // Globals threaded into the callee by localization are forwarded here.
    let extra: Vec<Id> = b
        .module()
        .function(func)
        .parameters
        .iter()
        .filter(|p| p.alias_global_variable)
        .map(|p| {
            b.module()
                .variable(p.id)
                .basevariable
        })
        .collect();
    for global in extra {
        args.push(b.to_func_call_arg(global)?);
    }

    let callee = b.to_name(func);
    let call = format!("{callee}({})", args.join(", "));
    let returns_void = b.module().ty(result_type).base == BaseType::Void;
    if returns_void {
        statement(b, format!("{call};"));
        Ok(())
    } else {
        b.state_mut().forced_temporaries.insert(id);
        emit_op(b, result_type, id, call, false)
    }
}

fn base_emit_composite_construct<B: Backend>(b: &mut B, inst: &Instruction) -> Result<(), Error> {
    let ops = &inst.operands;
    let result_type = Id(ops[0]);
    let id = Id(ops[1]);
    let ty = b.module().ty(result_type).clone();

    let mut parts = Vec::with_capacity(ops.len() - 2);
    for &word in &ops[2..] {
        parts.push(to_expression(b, Id(word))?);
    }
    let joined = parts.join(", ");

    if (ty.is_array() || ty.base == BaseType::Struct) && b.state().dialect.use_initializer_list {
        // Initializer lists are only valid in declarations, so the result
        // always becomes a temporary.
        let name = b.to_name(id);
        let decl = variable_decl(b, &ty, &name, id)?;
        statement(b, format!("{decl} = {{{joined}}};"));
        b.module_mut().set_expression(
            id,
            crate::Expression {
                text: name,
                expression_type: result_type,
                immutable: false,
                need_transpose: false,
                packed: false,
                base_variable: Id::NONE,
            },
        );
        Ok(())
    } else {
        let text = format!("{}({})", b.type_to_glsl(&ty, Id::NONE), joined);
        emit_op(b, result_type, id, text, true)
    }
}

fn composite_index_path<B: Backend>(
    b: &B,
    mut current: Id,
    indices: &[u32],
) -> Result<String, Error> {
    let mut path = String::new();
    let mut array_depth = b.module().ty(current).array.len();
    for &index in indices {
        let ty = b.module().ty(current);
        if array_depth > 0 {
            path.push_str(&format!("[{index}]"));
            array_depth -= 1;
            continue;
        }
        match ty.base {
            BaseType::Struct => {
                let canonical = b.module().canonical_type_id(current);
                let name = b.module().member_name(canonical, index).to_string();
                if name.is_empty() {
                    path.push_str(&format!("._m{index}"));
                } else {
                    path.push('.');
                    path.push_str(&name);
                }
                current = b.module().ty(canonical).members[index as usize];
                array_depth = b.module().ty(current).array.len();
            }
            _ if ty.is_matrix() => path.push_str(&format!("[{index}]")),
            _ if ty.vecsize > 1 => {
                if index as usize >= crate::back::COMPONENTS.len() {
                    return Err(Error::InvalidComponentIndex(index));
                }
                path.push('.');
                path.push(crate::back::COMPONENTS[index as usize]);
            }
            _ => path.push_str(&format!("[{index}]")),
        }
    }
    Ok(path)
}

fn base_emit_composite_extract<B: Backend>(b: &mut B, inst: &Instruction) -> Result<(), Error> {
    let ops = &inst.operands;
    let result_type = Id(ops[0]);
    let id = Id(ops[1]);
    let composite = Id(ops[2]);

    let base = to_enclosed_expression(b, composite)?;
    let source_type = b.module().expression_type_id(composite);
    let path = composite_index_path(b, source_type, &ops[3..])?;
    emit_op(b, result_type, id, format!("{base}{path}"), should_forward(b, composite))
}

fn base_emit_composite_insert<B: Backend>(b: &mut B, inst: &Instruction) -> Result<(), Error> {
    let ops = &inst.operands;
    let result_type = Id(ops[0]);
    let id = Id(ops[1]);
    let object = Id(ops[2]);
    let composite = Id(ops[3]);

    let ty = b.module().ty(result_type).clone();
    let name = b.to_name(id);
    let decl = variable_decl(b, &ty, &name, id)?;
    let source = to_expression(b, composite)?;
    statement(b, format!("{decl} = {source};"));
    let path = composite_index_path(b, result_type, &ops[4..])?;
    let value = to_expression(b, object)?;
    statement(b, format!("{name}{path} = {value};"));
    b.module_mut().set_expression(
        id,
        crate::Expression {
            text: name,
            expression_type: result_type,
            immutable: false,
            need_transpose: false,
            packed: false,
            base_variable: Id::NONE,
        },
    );
    Ok(())
}

fn base_emit_vector_shuffle<B: Backend>(b: &mut B, inst: &Instruction) -> Result<(), Error> {
    let ops = &inst.operands;
    let result_type = Id(ops[0]);
    let id = Id(ops[1]);
    let vec0 = Id(ops[2]);
    let vec1 = Id(ops[3]);
    let components = &ops[4..];

    let vec0_size = {
        let t = b.module().expression_type(vec0);
        b.module().ty(t.self_id).vecsize
    };

    let single_source = components
        .iter()
        .all(|&c| c == u32::MAX || c < vec0_size)
        || components.iter().all(|&c| c == u32::MAX || c >= vec0_size);
    if single_source {
        let from_first = components.iter().any(|&c| c != u32::MAX && c < vec0_size)
            || components.iter().all(|&c| c == u32::MAX);
        let source = if from_first { vec0 } else { vec1 };
        let base = to_enclosed_expression(b, source)?;
        let mut swizzle = String::from(".");
        for &c in components {
            let c = if c == u32::MAX { 0 } else { c };
            let local = if from_first { c } else { c - vec0_size };
            swizzle.push(crate::back::COMPONENTS[local as usize]);
        }
        return emit_op(b, result_type, id, format!("{base}{swizzle}"), should_forward(b, source));
    }

    // Mixing two vectors: build a constructor selecting from both.
    let ty = b.module().ty(result_type).clone();
    let e0 = to_enclosed_expression(b, vec0)?;
    let e1 = to_enclosed_expression(b, vec1)?;
    let mut parts = Vec::with_capacity(components.len());
    for &c in components {
        let c = if c == u32::MAX { 0 } else { c };
        if c < vec0_size {
            parts.push(format!("{e0}.{}", crate::back::COMPONENTS[c as usize]));
        } else {
            parts.push(format!("{e1}.{}", crate::back::COMPONENTS[(c - vec0_size) as usize]));
        }
    }
    let text = format!("{}({})", b.type_to_glsl(&ty, Id::NONE), parts.join(", "));
    if b.state().dialect.force_temp_use_for_two_vector_shuffles {
        b.state_mut().forced_temporaries.insert(id);
        emit_op(b, result_type, id, text, false)
    } else {
        emit_op(b, result_type, id, text, true)
    }
}

/// Parse the optional image-operand words that trail a sampling
/// instruction, starting at `ops[start]`.
fn parse_image_operands(ops: &[u32], start: usize, args: &mut TexArgs) {
    if start >= ops.len() {
        return;
    }
    let mask = spirv::ImageOperands::from_bits_truncate(ops[start]);
    let mut cursor = start + 1;
    let mut take = || {
        let id = Id(ops[cursor]);
        cursor += 1;
        id
    };
    if mask.contains(spirv::ImageOperands::BIAS) {
        args.bias = take();
    }
    if mask.contains(spirv::ImageOperands::LOD) {
        args.lod = take();
    }
    if mask.contains(spirv::ImageOperands::GRAD) {
        args.grad_x = take();
        args.grad_y = take();
    }
    if mask.contains(spirv::ImageOperands::CONST_OFFSET) {
        args.const_offset = take();
    }
    if mask.contains(spirv::ImageOperands::OFFSET) {
        args.offset = take();
    }
    if mask.contains(spirv::ImageOperands::SAMPLE) {
        args.sample = take();
    }
}

/// Assemble a sampling/fetch/gather call from the instruction's operands
/// and the dialect's naming hooks.
pub fn base_emit_texture_op<B: Backend>(b: &mut B, inst: &Instruction) -> Result<(), Error> {
    use spirv::Op;

    let ops = &inst.operands;
    let result_type = Id(ops[0]);
    let id = Id(ops[1]);
    let img = Id(ops[2]);

    let is_fetch = matches!(inst.op, Op::ImageFetch | Op::ImageRead);
    let is_gather = matches!(inst.op, Op::ImageGather | Op::ImageDrefGather);
    let is_proj = matches!(
        inst.op,
        Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
    );
    let has_dref = matches!(
        inst.op,
        Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
            | Op::ImageDrefGather
    );

    let mut args = TexArgs {
        coord: Id(ops[3]),
        ..TexArgs::default()
    };
    let mut cursor = 4;
    if has_dref {
        args.dref = Id(ops[cursor]);
        cursor += 1;
    } else if inst.op == Op::ImageGather {
        args.component = Id(ops[cursor]);
        cursor += 1;
    }
    parse_image_operands(ops, cursor, &mut args);

    let mut forward = true;
    let fname = b.to_function_name(img, is_fetch, is_gather, has_dref)?;
    let fargs = b.to_function_args(img, is_fetch, is_gather, is_proj, &args, &mut forward)?;
    emit_op(b, result_type, id, format!("{fname}({fargs})"), forward)
}

/// The GLSL-family mapping of a `GLSL.std.450` extended instruction.
pub fn base_emit_glsl_op<B: Backend>(
    b: &mut B,
    result_type: Id,
    id: Id,
    op: u32,
    args: &[u32],
) -> Result<(), Error> {
    use spirv::GLOp;

    let glop = GLOp::from_u32(op).ok_or(Error::UnsupportedExtInst(op))?;
    let ids: Vec<Id> = args.iter().map(|&w| Id(w)).collect();

    let fname = match glop {
        GLOp::Round => "round",
        GLOp::RoundEven => "roundEven",
        GLOp::Trunc => "trunc",
        GLOp::FAbs | GLOp::SAbs => "abs",
        GLOp::FSign | GLOp::SSign => "sign",
        GLOp::Floor => "floor",
        GLOp::Ceil => "ceil",
        GLOp::Fract => "fract",
        GLOp::Radians => "radians",
        GLOp::Degrees => "degrees",
        GLOp::Sin => "sin",
        GLOp::Cos => "cos",
        GLOp::Tan => "tan",
        GLOp::Asin => "asin",
        GLOp::Acos => "acos",
        GLOp::Atan => "atan",
        GLOp::Sinh => "sinh",
        GLOp::Cosh => "cosh",
        GLOp::Tanh => "tanh",
        GLOp::Asinh => "asinh",
        GLOp::Acosh => "acosh",
        GLOp::Atanh => "atanh",
        GLOp::Atan2 => "atan",
        GLOp::Pow => "pow",
        GLOp::Exp => "exp",
        GLOp::Log => "log",
        GLOp::Exp2 => "exp2",
        GLOp::Log2 => "log2",
        GLOp::Sqrt => "sqrt",
        GLOp::InverseSqrt => "inversesqrt",
        GLOp::Determinant => "determinant",
        GLOp::MatrixInverse => "inverse",
        GLOp::FMin | GLOp::UMin | GLOp::SMin | GLOp::NMin => "min",
        GLOp::FMax | GLOp::UMax | GLOp::SMax | GLOp::NMax => "max",
        GLOp::FClamp | GLOp::UClamp | GLOp::SClamp | GLOp::NClamp => "clamp",
        GLOp::FMix => "mix",
        GLOp::Step => "step",
        GLOp::SmoothStep => "smoothstep",
        GLOp::Fma => "fma",
        GLOp::Ldexp => "ldexp",
        GLOp::PackSnorm4x8 => "packSnorm4x8",
        GLOp::PackUnorm4x8 => "packUnorm4x8",
        GLOp::PackSnorm2x16 => "packSnorm2x16",
        GLOp::PackUnorm2x16 => "packUnorm2x16",
        GLOp::PackHalf2x16 => "packHalf2x16",
        GLOp::UnpackSnorm4x8 => "unpackSnorm4x8",
        GLOp::UnpackUnorm4x8 => "unpackUnorm4x8",
        GLOp::UnpackSnorm2x16 => "unpackSnorm2x16",
        GLOp::UnpackUnorm2x16 => "unpackUnorm2x16",
        GLOp::UnpackHalf2x16 => "unpackHalf2x16",
        GLOp::Length => "length",
        GLOp::Distance => "distance",
        GLOp::Cross => "cross",
        GLOp::Normalize => "normalize",
        GLOp::FaceForward => "faceforward",
        GLOp::Reflect => "reflect",
        GLOp::Refract => "refract",
        GLOp::FindILsb => "findLSB",
        GLOp::FindSMsb | GLOp::FindUMsb => "findMSB",
        _ => return Err(Error::UnsupportedExtInst(op)),
    };
    emit_nary_func_op(b, result_type, id, &ids, fname)
}

/// Emit a function, its not-yet-emitted callees first.
pub fn base_emit_function<B: Backend>(b: &mut B, func_id: Id) -> Result<(), Error> {
    if !b.state_mut().emitted_functions.insert(func_id) {
        return Ok(());
    }

    // Callees before callers, so no prototypes are needed.
    let mut callees = Vec::new();
    {
        let module = b.module();
        let function = module.function(func_id);
        for &block_id in &function.blocks {
            for inst in &module.block(block_id).instructions {
                if inst.op == spirv::Op::FunctionCall {
                    callees.push(inst.id_operand(2));
                }
            }
        }
    }
    for callee in callees {
        base_emit_function(b, callee)?;
    }

    let entry = b.module().entry_point.function;
    b.state_mut().current_function = func_id;
    b.state_mut().processing_entry_point = func_id == entry;

    b.emit_function_prototype(func_id)?;
    begin_scope(b);

    let locals = b.module().function(func_id).local_variables.clone();
    for var_id in locals {
        base_emit_local_variable(b, var_id)?;
    }

    let first_block = b.module().function(func_id).blocks.first().copied();
    if let Some(first) = first_block {
        base_emit_block_chain(b, first, Id::NONE)?;
    }

    end_scope(b);
    statement(b, "");
    b.state_mut().current_function = Id::NONE;
    b.state_mut().processing_entry_point = false;
    Ok(())
}

fn base_emit_local_variable<B: Backend>(b: &mut B, var_id: Id) -> Result<(), Error> {
    let (type_id, initializer) = {
        let var = b.module().variable(var_id);
        (var.basetype, var.initializer)
    };
    let ty = {
        let ptr = b.module().ty(type_id);
        b.module().ty(ptr.self_id).clone()
    };
    let quals = b.variable_qualifiers(var_id);
    let name = b.to_name(var_id);
    let decl = variable_decl(b, &ty, &name, var_id)?;
    let init = if initializer.is_some() {
        match *b.module().entity(initializer) {
            Entity::Expression(ref e) => format!(" = {}", e.text),
            Entity::Constant(_) => {
                let text = to_expression(b, initializer)?;
                format!(" = {text}")
            }
            _ => String::new(),
        }
    } else {
        String::new()
    };
    statement(b, format!("{quals}{decl}{init};"));
    Ok(())
}

/// Emit the chain of blocks starting at `block_id`, stopping when control
/// reaches `until`.
pub fn base_emit_block_chain<B: Backend>(b: &mut B, mut block_id: Id, until: Id) -> Result<(), Error> {
    loop {
        if block_id == until {
            return Ok(());
        }

        let merge = b.module().block(block_id).merge;
        if let Merge::Loop {
            merge: loop_merge,
            continue_block,
        } = merge
        {
            base_emit_loop(b, block_id, loop_merge, continue_block)?;
            block_id = loop_merge;
            continue;
        }

        base_emit_block_body(b, block_id)?;

        let terminator = b.module().block(block_id).terminator;
        match terminator {
            Terminator::Return { value } => {
                if b.state().processing_entry_point {
                    b.emit_fixup()?;
                }
                if value.is_some() {
                    let text = to_expression(b, value)?;
                    statement(b, format!("return {text};"));
                } else if until.is_some() {
                    // An early return from inside a structured construct;
                    // falling off the end of the function needs no statement.
                    statement(b, "return;");
                }
                return Ok(());
            }
            Terminator::Kill => {
                let discard = b.state().dialect.discard_literal;
                statement(b, format!("{discard};"));
                return Ok(());
            }
            Terminator::Unreachable => return Ok(()),
            Terminator::Branch { target } => {
                match base_resolve_branch(b, target, until) {
                    BranchKind::Fallthrough => block_id = target,
                    BranchKind::Done => return Ok(()),
                }
            }
            Terminator::BranchConditional {
                condition,
                true_block,
                false_block,
            } => {
                let merge_target = match merge {
                    Merge::Selection { merge } => merge,
                    _ => return Err(Error::UnstructuredControlFlow),
                };
                let cond = to_enclosed_expression(b, condition)?;
                if true_block == merge_target {
                    statement(b, format!("if (!{cond})"));
                    begin_scope(b);
                    base_emit_block_chain(b, false_block, merge_target)?;
                    end_scope(b);
                } else {
                    statement(b, format!("if ({cond})"));
                    begin_scope(b);
                    base_emit_block_chain(b, true_block, merge_target)?;
                    end_scope(b);
                    if false_block != merge_target {
                        statement(b, "else");
                        begin_scope(b);
                        base_emit_block_chain(b, false_block, merge_target)?;
                        end_scope(b);
                    }
                }
                block_id = merge_target;
            }
        }
    }
}

enum BranchKind {
    Fallthrough,
    Done,
}

fn base_resolve_branch<B: Backend>(b: &mut B, target: Id, until: Id) -> BranchKind {
    if target == until {
        return BranchKind::Fallthrough; // caught by the chain loop's guard
    }
    if let Some(&(loop_merge, continue_block)) = b.state().loop_stack.last() {
        if target == loop_merge {
            statement(b, "break;");
            return BranchKind::Done;
        }
        if target == continue_block {
            statement(b, "continue;");
            return BranchKind::Done;
        }
    }
    BranchKind::Fallthrough
}

fn base_emit_block_body<B: Backend>(b: &mut B, block_id: Id) -> Result<(), Error> {
    let instructions = b.module().block(block_id).instructions.clone();
    for inst in &instructions {
        b.emit_instruction(inst)?;
    }
    Ok(())
}

fn base_emit_loop<B: Backend>(
    b: &mut B,
    header: Id,
    merge: Id,
    continue_block: Id,
) -> Result<(), Error> {
    statement(b, "for (;;)");
    begin_scope(b);
    b.state_mut().loop_stack.push((merge, continue_block));

    base_emit_block_body(b, header)?;

    let terminator = b.module().block(header).terminator;
    match terminator {
        Terminator::BranchConditional {
            condition,
            true_block,
            false_block,
        } if false_block == merge => {
            let cond = to_enclosed_expression(b, condition)?;
            statement(b, format!("if (!{cond})"));
            begin_scope(b);
            statement(b, "break;");
            end_scope(b);
            base_emit_block_chain(b, true_block, continue_block)?;
        }
        Terminator::Branch { target } => {
            base_emit_block_chain(b, target, continue_block)?;
        }
        _ => return Err(Error::UnstructuredControlFlow),
    }

    if continue_block != header {
        base_emit_block_body(b, continue_block)?;
    }

    b.state_mut().loop_stack.pop();
    end_scope(b);
    Ok(())
}

/// The `gl_*` pseudo-name of a builtin, used wherever the dialect has no
/// closer spelling.
pub fn base_builtin_to_name(builtin: spirv::BuiltIn, _storage: spirv::StorageClass) -> String {
    use spirv::BuiltIn as Bi;
    match builtin {
        Bi::Position => "gl_Position",
        Bi::PointSize => "gl_PointSize",
        Bi::ClipDistance => "gl_ClipDistance",
        Bi::CullDistance => "gl_CullDistance",
        Bi::VertexId => "gl_VertexID",
        Bi::InstanceId => "gl_InstanceID",
        Bi::VertexIndex => "gl_VertexIndex",
        Bi::InstanceIndex => "gl_InstanceIndex",
        Bi::FragCoord => "gl_FragCoord",
        Bi::FrontFacing => "gl_FrontFacing",
        Bi::PointCoord => "gl_PointCoord",
        Bi::SampleId => "gl_SampleID",
        Bi::SampleMask => "gl_SampleMask",
        Bi::FragDepth => "gl_FragDepth",
        Bi::Layer => "gl_Layer",
        Bi::GlobalInvocationId => "gl_GlobalInvocationID",
        Bi::LocalInvocationId => "gl_LocalInvocationID",
        Bi::LocalInvocationIndex => "gl_LocalInvocationIndex",
        Bi::WorkgroupId => "gl_WorkGroupID",
        Bi::NumWorkgroups => "gl_NumWorkGroups",
        Bi::WorkgroupSize => "gl_WorkGroupSize",
        other => return format!("gl_unknown_{other:?}"),
    }
    .to_string()
}
