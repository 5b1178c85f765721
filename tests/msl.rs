//! End-to-end translation scenarios, driving hand-assembled IR modules
//! through the MSL backend.

use smelter::back::msl::{self, Error, Options, ResourceBinding, VertexAttribute};
use smelter::{
    BaseType, Block, Constant, DecorationFlags, EntryPoint, Extension, Function, Id, Instruction,
    Module, ScalarValue, Terminator, Type, Variable,
};
use spirv::{BuiltIn, ExecutionModel, Op, StorageClass};

struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    fn new(model: ExecutionModel, entry_name: &str) -> Self {
        let mut module = Module::with_bound(1);
        module.entry_point = EntryPoint {
            name: entry_name.to_string(),
            model,
            ..EntryPoint::default()
        };
        ModuleBuilder { module }
    }

    fn id(&mut self) -> Id {
        self.module.increase_bound_by(1)
    }

    fn ty(&mut self, ty: Type) -> Id {
        let id = self.id();
        self.module.set_type(id, ty)
    }

    /// A pointer type: a clone of the pointee with the pointer flag set,
    /// `self_id` still naming the pointee.
    fn pointer_to(&mut self, pointee: Id, storage: StorageClass) -> Id {
        let mut ty = self.module.ty(pointee).clone();
        ty.pointer = true;
        ty.storage = Some(storage);
        ty.self_id = pointee;
        let id = self.id();
        self.module.set_type(id, ty)
    }

    fn structure(&mut self, name: &str, members: &[(&str, Id, u32)]) -> Id {
        let id = self.id();
        self.module.set_type(
            id,
            Type {
                base: BaseType::Struct,
                members: members.iter().map(|&(_, ty, _)| ty).collect(),
                ..Type::default()
            },
        );
        self.module.set_name(id, name);
        for (index, &(member_name, _, offset)) in members.iter().enumerate() {
            self.module.set_member_name(id, index as u32, member_name);
            let dec = self.module.member_decoration_mut(id, index as u32);
            dec.offset = offset;
            dec.flags |= DecorationFlags::OFFSET;
        }
        id
    }

    fn variable(&mut self, ptr_type: Id, storage: StorageClass, name: &str) -> Id {
        let id = self.id();
        self.module.set_variable(id, Variable::new(ptr_type, storage));
        self.module.set_name(id, name);
        id
    }

    fn location(&mut self, id: Id, location: u32) {
        let dec = &mut self.module.meta_mut(id).decoration;
        dec.location = location;
        dec.flags |= DecorationFlags::LOCATION;
    }

    fn builtin(&mut self, id: Id, builtin: BuiltIn) {
        let dec = &mut self.module.meta_mut(id).decoration;
        dec.builtin = Some(builtin);
        dec.flags |= DecorationFlags::BUILTIN;
    }

    fn binding(&mut self, id: Id, set: u32, binding: u32) {
        let dec = &mut self.module.meta_mut(id).decoration;
        dec.set = set;
        dec.binding = binding;
        dec.flags |= DecorationFlags::DESCRIPTOR_SET | DecorationFlags::BINDING;
    }

    fn constant_u32(&mut self, ty: Id, value: u32) -> Id {
        let id = self.id();
        self.module
            .set_constant(id, Constant::new(ty, ScalarValue::Uint(value as u64)))
    }

    fn constant_f32(&mut self, ty: Id, value: f32) -> Id {
        let id = self.id();
        self.module
            .set_constant(id, Constant::new(ty, ScalarValue::Float(value as f64)))
    }

    fn glsl_ext(&mut self) -> Id {
        let id = self.id();
        self.module.set_extension(id, Extension::GlslStd450)
    }

    /// A single-block function; returns the function ID.
    fn function(&mut self, return_type: Id, instructions: Vec<Instruction>, terminator: Terminator) -> Id {
        let block_id = self.id();
        let mut block = Block::new(terminator);
        block.instructions = instructions;
        self.module.set_block(block_id, block);

        let func_id = self.id();
        self.module.set_function(
            func_id,
            Function {
                return_type,
                blocks: vec![block_id],
                ..Function::default()
            },
        );
        func_id
    }

    fn entry(mut self, function: Id) -> Module {
        self.module.entry_point.function = function;
        self.module
    }
}

fn inst(op: Op, operands: &[u32]) -> Instruction {
    Instruction::new(op, operands.to_vec())
}

fn compile(module: Module) -> String {
    msl::write_string(module, &Options::default(), &mut [], &mut [])
        .expect("translation should succeed")
}

fn occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

/// `void main() { gl_Position = in_pos; }` with `in_pos` at location 0.
fn minimal_vertex_module() -> Module {
    let mut b = ModuleBuilder::new(ExecutionModel::Vertex, "main");
    let t_void = b.ty(Type::default());
    let t_vec4 = b.ty(Type::vector(BaseType::Float, 32, 4));
    let t_ptr_in = b.pointer_to(t_vec4, StorageClass::Input);
    let t_ptr_out = b.pointer_to(t_vec4, StorageClass::Output);

    let v_in = b.variable(t_ptr_in, StorageClass::Input, "in_pos");
    b.location(v_in, 0);
    let v_out = b.variable(t_ptr_out, StorageClass::Output, "gl_Position");
    b.builtin(v_out, BuiltIn::Position);

    let loaded = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(Op::Load, &[t_vec4.0, loaded.0, v_in.0]),
            inst(Op::Store, &[v_out.0, loaded.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    b.entry(main)
}

#[test]
fn minimal_vertex() {
    let msl = compile(minimal_vertex_module());

    assert!(msl.contains("vertex main0_out main0(main0_in in [[stage_in]])"));
    assert!(msl.contains("float4 in_pos [[attribute(0)]];"));
    assert!(msl.contains("float4 gl_Position [[position]];"));
    assert!(msl.contains("out.gl_Position = in.in_pos;"));
    assert!(msl.contains("return out;"));
    assert_eq!(occurrences(&msl, "#include <metal_stdlib>"), 1);
    assert_eq!(occurrences(&msl, "using namespace metal;"), 1);
    // No barriers were in the source, so none may appear in the output.
    assert!(!msl.contains("threadgroup_barrier"));
}

#[test]
fn translation_is_deterministic() {
    let first = compile(minimal_vertex_module());
    let second = compile(minimal_vertex_module());
    assert_eq!(first, second);
}

/// A vertex `mat4` input cannot ride in `stage_in`; it diverts to a
/// secondary buffer indexed with the vertex index builtin.
#[test]
fn matrix_stage_in_diverts_to_buffer() {
    let mut b = ModuleBuilder::new(ExecutionModel::Vertex, "main");
    let t_void = b.ty(Type::default());
    let t_vec4 = b.ty(Type::vector(BaseType::Float, 32, 4));
    let t_mat4 = b.ty(Type::matrix(BaseType::Float, 32, 4, 4));
    let t_uint = b.ty(Type::scalar(BaseType::UInt, 32));
    let t_ptr_mat_in = b.pointer_to(t_mat4, StorageClass::Input);
    let t_ptr_vec_in = b.pointer_to(t_vec4, StorageClass::Input);
    let t_ptr_out = b.pointer_to(t_vec4, StorageClass::Output);

    let v_matrix = b.variable(t_ptr_mat_in, StorageClass::Input, "m");
    b.location(v_matrix, 0);
    let v_scalar = b.variable(t_ptr_vec_in, StorageClass::Input, "pos2");
    b.location(v_scalar, 1);
    let v_out = b.variable(t_ptr_out, StorageClass::Output, "gl_Position");
    b.builtin(v_out, BuiltIn::Position);

    let c0 = b.constant_u32(t_uint, 0);
    let chain = b.id();
    let loaded_column = b.id();
    let loaded_pos = b.id();
    let sum = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(Op::AccessChain, &[t_ptr_vec_in.0, chain.0, v_matrix.0, c0.0]),
            inst(Op::Load, &[t_vec4.0, loaded_column.0, chain.0]),
            inst(Op::Load, &[t_vec4.0, loaded_pos.0, v_scalar.0]),
            inst(Op::FAdd, &[t_vec4.0, sum.0, loaded_column.0, loaded_pos.0]),
            inst(Op::Store, &[v_out.0, sum.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let module = b.entry(main);

    let mut attributes = [
        VertexAttribute {
            location: 0,
            msl_buffer: 1,
            msl_offset: 0,
            msl_stride: 64,
            per_instance: false,
            used_by_shader: false,
        },
        VertexAttribute {
            location: 1,
            msl_buffer: 0,
            msl_offset: 0,
            msl_stride: 16,
            per_instance: false,
            used_by_shader: false,
        },
    ];
    let msl = msl::write_string(module, &Options::default(), &mut attributes, &mut [])
        .expect("translation should succeed");

    assert!(msl.contains("device main0_in1* in1 [[buffer(1)]]"));
    assert!(msl.contains("uint gl_VertexIndex [[vertex_id]]"));
    assert!(msl.contains("struct main0_in1"));
    assert!(msl.contains("float4x4 m;"));
    assert!(msl.contains("float4 pos2 [[attribute(1)]];"));
    assert!(msl.contains("out.gl_Position = in1[gl_VertexIndex].m[0] + in.pos2;"));
    assert!(attributes[0].used_by_shader);
    assert!(attributes[1].used_by_shader);
}

fn storage_buffer_counter_module() -> (ModuleBuilder, Id, Id, Id, Id) {
    let mut b = ModuleBuilder::new(ExecutionModel::GLCompute, "main");
    let t_void = b.ty(Type::default());
    let t_uint = b.ty(Type::scalar(BaseType::UInt, 32));
    let t_block = b.structure("SSBO", &[("counter", t_uint, 0)]);
    b.module
        .set_decoration(t_block, DecorationFlags::BUFFER_BLOCK);
    let t_ptr_block = b.pointer_to(t_block, StorageClass::Uniform);
    let t_ptr_uint = b.pointer_to(t_uint, StorageClass::Uniform);

    let v_buf = b.variable(t_ptr_block, StorageClass::Uniform, "ssbo");
    b.binding(v_buf, 0, 0);
    (b, t_void, t_uint, t_ptr_uint, v_buf)
}

/// `OpAtomicIIncrement` on a storage-buffer member becomes a relaxed
/// `atomic_fetch_add_explicit` through a cast pointer.
#[test]
fn atomic_counter_increment() {
    let (mut b, t_void, t_uint, t_ptr_uint, v_buf) = storage_buffer_counter_module();
    let c0 = b.constant_u32(t_uint, 0);
    let c_scope = b.constant_u32(t_uint, spirv::Scope::Device as u32);
    let c_sem = b.constant_u32(t_uint, 0);

    let chain = b.id();
    let result = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(Op::AccessChain, &[t_ptr_uint.0, chain.0, v_buf.0, c0.0]),
            inst(
                Op::AtomicIIncrement,
                &[t_uint.0, result.0, chain.0, c_scope.0, c_sem.0],
            ),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let msl = compile(b.entry(main));

    assert!(msl.contains(
        "atomic_fetch_add_explicit((volatile device atomic_uint*)&(ssbo.counter), 1, memory_order_relaxed)"
    ));
    assert!(msl.contains("#include <metal_atomic>"));
    assert!(msl.contains("device SSBO& ssbo [[buffer(0)]]"));
    assert!(msl.contains("kernel void main0("));
}

/// GLSL `inverse()` has no MSL equivalent; the backend injects the helper
/// functions and calls them.
#[test]
fn matrix_inverse_injects_helpers() {
    let mut b = ModuleBuilder::new(ExecutionModel::Fragment, "main");
    let t_void = b.ty(Type::default());
    let t_float = b.ty(Type::scalar(BaseType::Float, 32));
    let t_vec4 = b.ty(Type::vector(BaseType::Float, 32, 4));
    let t_mat3 = b.ty(Type::matrix(BaseType::Float, 32, 3, 3));
    let t_uint = b.ty(Type::scalar(BaseType::UInt, 32));

    let t_block = b.structure("UBO", &[("m", t_mat3, 0)]);
    b.module.set_decoration(t_block, DecorationFlags::BLOCK);
    {
        let dec = b.module.member_decoration_mut(t_block, 0);
        dec.flags |= DecorationFlags::COL_MAJOR;
    }
    let t_ptr_block = b.pointer_to(t_block, StorageClass::Uniform);
    let t_ptr_mat = b.pointer_to(t_mat3, StorageClass::Uniform);
    let t_ptr_color = b.pointer_to(t_vec4, StorageClass::Output);

    let v_ubo = b.variable(t_ptr_block, StorageClass::Uniform, "ubo");
    b.binding(v_ubo, 0, 0);
    let v_color = b.variable(t_ptr_color, StorageClass::Output, "color");
    b.location(v_color, 0);

    let ext = b.glsl_ext();
    let c0 = b.constant_u32(t_uint, 0);
    let chain = b.id();
    let loaded = b.id();
    let inverted = b.id();
    let element = b.id();
    let composed = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(Op::AccessChain, &[t_ptr_mat.0, chain.0, v_ubo.0, c0.0]),
            inst(Op::Load, &[t_mat3.0, loaded.0, chain.0]),
            inst(
                Op::ExtInst,
                &[
                    t_mat3.0,
                    inverted.0,
                    ext.0,
                    spirv::GLOp::MatrixInverse as u32,
                    loaded.0,
                ],
            ),
            inst(Op::CompositeExtract, &[t_float.0, element.0, inverted.0, 0, 0]),
            inst(
                Op::CompositeConstruct,
                &[t_vec4.0, composed.0, element.0, element.0, element.0, element.0],
            ),
            inst(Op::Store, &[v_color.0, composed.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let msl = compile(b.entry(main));

    assert!(msl.contains("inline float spvDet2x2(float a1, float a2, float b1, float b2)"));
    assert!(msl.contains("float3x3 spvInverse3x3(float3x3 m)"));
    assert!(msl.contains("spvInverse3x3(ubo.m)"));
    assert!(msl.contains("float4 color [[color(0)]];"));
    assert!(msl.contains("fragment main0_out main0(constant UBO& ubo [[buffer(0)]])"));
}

/// `memoryBarrierShared(); barrier();` must emit a single combined
/// threadgroup barrier, because MSL memory barriers are control barriers.
#[test]
fn compute_barrier_pair_is_combined() {
    let mut b = ModuleBuilder::new(ExecutionModel::GLCompute, "main");
    let t_void = b.ty(Type::default());
    let t_float = b.ty(Type::scalar(BaseType::Float, 32));
    let t_uint = b.ty(Type::scalar(BaseType::UInt, 32));
    let t_ptr_shared = b.pointer_to(t_float, StorageClass::Workgroup);

    let v_shared = b.variable(t_ptr_shared, StorageClass::Workgroup, "sdata");
    let c_one = b.constant_f32(t_float, 1.0);
    let c_scope = b.constant_u32(t_uint, spirv::Scope::Workgroup as u32);
    let c_sem = b.constant_u32(
        t_uint,
        spirv::MemorySemantics::WORKGROUP_MEMORY.bits()
            | spirv::MemorySemantics::ACQUIRE_RELEASE.bits(),
    );

    let main = b.function(
        t_void,
        vec![
            inst(Op::Store, &[v_shared.0, c_one.0]),
            inst(Op::MemoryBarrier, &[c_scope.0, c_sem.0]),
            inst(Op::ControlBarrier, &[c_scope.0, c_scope.0, c_sem.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let msl = compile(b.entry(main));

    assert_eq!(occurrences(&msl, "threadgroup_barrier"), 1);
    assert!(msl.contains("threadgroup_barrier(mem_flags::mem_threadgroup);"));
    assert!(msl.contains("threadgroup float sdata;"));
}

/// A `{vec3, float}` uniform pair at offsets 0 and 12 packs the vector
/// instead of padding the scalar.
#[test]
fn packed_vec3_followed_by_scalar() {
    let mut b = ModuleBuilder::new(ExecutionModel::GLCompute, "main");
    let t_void = b.ty(Type::default());
    let t_float = b.ty(Type::scalar(BaseType::Float, 32));
    let t_vec3 = b.ty(Type::vector(BaseType::Float, 32, 3));
    let t_uint = b.ty(Type::scalar(BaseType::UInt, 32));

    let t_block = b.structure("UBO", &[("a", t_vec3, 0), ("b", t_float, 12)]);
    b.module.set_decoration(t_block, DecorationFlags::BLOCK);
    let t_ptr_block = b.pointer_to(t_block, StorageClass::Uniform);
    let t_ptr_float = b.pointer_to(t_float, StorageClass::Uniform);

    let v_ubo = b.variable(t_ptr_block, StorageClass::Uniform, "ubo");
    b.binding(v_ubo, 0, 0);

    let c1 = b.constant_u32(t_uint, 1);
    let chain = b.id();
    let loaded = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(Op::AccessChain, &[t_ptr_float.0, chain.0, v_ubo.0, c1.0]),
            inst(Op::Load, &[t_float.0, loaded.0, chain.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let msl = compile(b.entry(main));

    assert!(msl.contains("packed_float3 a;"));
    assert!(msl.contains("float b;"));
    assert!(!msl.contains("char pad"));
}

/// A module-scope uniform reached from a callee is threaded through the
/// call chain as an explicit parameter, exactly once.
#[test]
fn globals_thread_through_call_chains() {
    let mut b = ModuleBuilder::new(ExecutionModel::Vertex, "main");
    let t_void = b.ty(Type::default());
    let t_float = b.ty(Type::scalar(BaseType::Float, 32));
    let t_vec4 = b.ty(Type::vector(BaseType::Float, 32, 4));
    let t_uint = b.ty(Type::scalar(BaseType::UInt, 32));

    let t_block = b.structure("UBO", &[("x", t_float, 0)]);
    b.module.set_decoration(t_block, DecorationFlags::BLOCK);
    let t_ptr_block = b.pointer_to(t_block, StorageClass::Uniform);
    let t_ptr_float = b.pointer_to(t_float, StorageClass::Uniform);
    let t_ptr_out = b.pointer_to(t_vec4, StorageClass::Output);

    let v_ubo = b.variable(t_ptr_block, StorageClass::Uniform, "ubo");
    b.binding(v_ubo, 0, 0);
    let v_out = b.variable(t_ptr_out, StorageClass::Output, "gl_Position");
    b.builtin(v_out, BuiltIn::Position);

    let c0 = b.constant_u32(t_uint, 0);
    let chain = b.id();
    let loaded = b.id();
    let callee = b.function(
        t_void, // placeholder, replaced below
        vec![
            inst(Op::AccessChain, &[t_ptr_float.0, chain.0, v_ubo.0, c0.0]),
            inst(Op::Load, &[t_float.0, loaded.0, chain.0]),
        ],
        Terminator::Return { value: loaded },
    );
    b.module.function_mut(callee).return_type = t_float;
    b.module.set_name(callee, "fetch_x");

    let fetched = b.id();
    let composed = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(Op::FunctionCall, &[t_float.0, fetched.0, callee.0]),
            inst(
                Op::CompositeConstruct,
                &[t_vec4.0, composed.0, fetched.0, fetched.0, fetched.0, fetched.0],
            ),
            inst(Op::Store, &[v_out.0, composed.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let msl = compile(b.entry(main));

    assert!(msl.contains("float fetch_x(constant UBO& ubo)"));
    assert!(msl.contains("fetch_x(ubo)"));
    assert!(msl.contains("return ubo.x;"));
    // Threaded exactly once into the callee, once into the entry point.
    assert_eq!(occurrences(&msl, "constant UBO& ubo"), 2);
    assert!(msl.contains("#pragma clang diagnostic ignored \"-Wmissing-prototypes\""));
}

/// Compute builtin inputs ride on the entry signature.
#[test]
fn compute_builtins_on_entry_signature() {
    let (mut b, t_void, t_uint, t_ptr_uint, v_buf) = storage_buffer_counter_module();
    let t_uint3 = b.ty(Type::vector(BaseType::UInt, 32, 3));
    let t_ptr_gid = b.pointer_to(t_uint3, StorageClass::Input);
    let v_gid = b.variable(t_ptr_gid, StorageClass::Input, "gl_GlobalInvocationID");
    b.builtin(v_gid, BuiltIn::GlobalInvocationId);

    let c0 = b.constant_u32(t_uint, 0);
    let loaded = b.id();
    let extracted = b.id();
    let chain = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(Op::Load, &[t_uint3.0, loaded.0, v_gid.0]),
            inst(Op::CompositeExtract, &[t_uint.0, extracted.0, loaded.0, 0]),
            inst(Op::AccessChain, &[t_ptr_uint.0, chain.0, v_buf.0, c0.0]),
            inst(Op::Store, &[chain.0, extracted.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let msl = compile(b.entry(main));

    assert!(msl.contains("uint3 gl_GlobalInvocationID [[thread_position_in_grid]]"));
    assert!(msl.contains("ssbo.counter = gl_GlobalInvocationID.x;"));
    assert!(msl.contains("kernel void main0("));
}

/// Scalar specialization constants become Metal function constants with a
/// fallback to their default value.
#[test]
fn specialization_constant_emits_function_constant() {
    let mut b = ModuleBuilder::new(ExecutionModel::Vertex, "main");
    let t_void = b.ty(Type::default());
    let t_float = b.ty(Type::scalar(BaseType::Float, 32));
    let t_vec4 = b.ty(Type::vector(BaseType::Float, 32, 4));
    let t_ptr_out = b.pointer_to(t_vec4, StorageClass::Output);

    let v_out = b.variable(t_ptr_out, StorageClass::Output, "gl_Position");
    b.builtin(v_out, BuiltIn::Position);

    let spec = b.id();
    let mut constant = Constant::new(t_float, ScalarValue::Float(0.5));
    constant.specialization = true;
    b.module.set_constant(spec, constant);
    b.module.set_name(spec, "scale");
    {
        let dec = &mut b.module.meta_mut(spec).decoration;
        dec.spec_id = 10;
        dec.flags |= DecorationFlags::SPEC_ID;
    }

    let composed = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(
                Op::CompositeConstruct,
                &[t_vec4.0, composed.0, spec.0, spec.0, spec.0, spec.0],
            ),
            inst(Op::Store, &[v_out.0, composed.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let msl = compile(b.entry(main));

    assert!(msl.contains("constant float scale_tmp [[function_constant(10)]];"));
    assert!(msl
        .contains("constant float scale = is_function_constant_defined(scale_tmp) ? scale_tmp : 0.5;"));
    assert!(msl.contains("float4(scale, scale, scale, scale)"));
}

/// A fragment output matrix has no Metal representation at all.
#[test]
fn fragment_output_matrix_is_rejected() {
    let mut b = ModuleBuilder::new(ExecutionModel::Fragment, "main");
    let t_void = b.ty(Type::default());
    let t_float = b.ty(Type::scalar(BaseType::Float, 32));
    let t_vec2 = b.ty(Type::vector(BaseType::Float, 32, 2));
    let t_mat2 = b.ty(Type::matrix(BaseType::Float, 32, 2, 2));
    let t_ptr_out = b.pointer_to(t_mat2, StorageClass::Output);

    let v_out = b.variable(t_ptr_out, StorageClass::Output, "weird");
    b.location(v_out, 0);

    let c_zero = b.constant_f32(t_float, 0.0);
    let col = b.id();
    let mut column = Constant::new(t_vec2, ScalarValue::Float(0.0));
    column.subconstants = vec![c_zero, c_zero];
    b.module.set_constant(col, column);
    let mat = b.id();
    let mut matrix = Constant::new(t_mat2, ScalarValue::Float(0.0));
    matrix.subconstants = vec![col, col];
    b.module.set_constant(mat, matrix);

    let main = b.function(
        t_void,
        vec![inst(Op::Store, &[v_out.0, mat.0])],
        Terminator::Return { value: Id::NONE },
    );
    let module = b.entry(main);

    let err = msl::write_string(module, &Options::default(), &mut [], &mut [])
        .expect_err("a fragment output matrix must be rejected");
    assert!(matches!(err, Error::FragmentOutputMatrixOrArray));
}

/// Automatic binding indices are dense per resource class, in declaration
/// order, and user-provided records preempt them.
#[test]
fn binding_indices_are_dense_and_overridable() {
    let mut b = ModuleBuilder::new(ExecutionModel::GLCompute, "main");
    let t_void = b.ty(Type::default());
    let t_float = b.ty(Type::scalar(BaseType::Float, 32));
    let t_uint = b.ty(Type::scalar(BaseType::UInt, 32));

    let t_block_a = b.structure("First", &[("a", t_float, 0)]);
    b.module.set_decoration(t_block_a, DecorationFlags::BLOCK);
    let t_block_b = b.structure("Second", &[("b", t_float, 0)]);
    b.module.set_decoration(t_block_b, DecorationFlags::BLOCK);
    let t_ptr_a = b.pointer_to(t_block_a, StorageClass::Uniform);
    let t_ptr_b = b.pointer_to(t_block_b, StorageClass::Uniform);
    let t_ptr_float = b.pointer_to(t_float, StorageClass::Uniform);

    let v_a = b.variable(t_ptr_a, StorageClass::Uniform, "first");
    b.binding(v_a, 0, 0);
    let v_b = b.variable(t_ptr_b, StorageClass::Uniform, "second");
    b.binding(v_b, 0, 1);

    let c0 = b.constant_u32(t_uint, 0);
    let chain_a = b.id();
    let chain_b = b.id();
    let load_a = b.id();
    let load_b = b.id();
    let main = b.function(
        t_void,
        vec![
            inst(Op::AccessChain, &[t_ptr_float.0, chain_a.0, v_a.0, c0.0]),
            inst(Op::Load, &[t_float.0, load_a.0, chain_a.0]),
            inst(Op::AccessChain, &[t_ptr_float.0, chain_b.0, v_b.0, c0.0]),
            inst(Op::Load, &[t_float.0, load_b.0, chain_b.0]),
        ],
        Terminator::Return { value: Id::NONE },
    );
    let module = b.entry(main);

    // Without records: dense assignment in declaration order.
    let msl = msl::write_string(module.clone(), &Options::default(), &mut [], &mut [])
        .expect("translation should succeed");
    assert!(msl.contains("first [[buffer(0)]]"));
    assert!(msl.contains("second [[buffer(1)]]"));

    // A matching record preempts the counter and is marked used.
    let mut bindings = [ResourceBinding {
        stage: ExecutionModel::GLCompute,
        desc_set: 0,
        binding: 1,
        msl_buffer: 7,
        msl_texture: 0,
        msl_sampler: 0,
        used_by_shader: false,
    }];
    let msl = msl::write_string(module, &Options::default(), &mut [], &mut bindings)
        .expect("translation should succeed");
    assert!(msl.contains("second [[buffer(7)]]"));
    assert!(bindings[0].used_by_shader);
}

/// The vertex fix-up options post-process the position output.
#[test]
fn vertex_fixups_adjust_position() {
    let mut options = Options::default();
    options.vertex.fixup_clipspace = true;
    options.vertex.flip_vert_y = true;
    let msl = msl::write_string(minimal_vertex_module(), &options, &mut [], &mut [])
        .expect("translation should succeed");

    let fixup = msl
        .find("out.gl_Position.z = (out.gl_Position.z + out.gl_Position.w) * 0.5;")
        .expect("clip-space fix-up should be emitted");
    let flip = msl
        .find("out.gl_Position.y = -(out.gl_Position.y);")
        .expect("y-flip fix-up should be emitted");
    let ret = msl.find("return out;").expect("entry returns the output block");
    assert!(fixup < ret && flip < ret);
}
