use super::{
    help::CustomFunction,
    keywords,
    layout::{self, PaddingMap, SortAspect},
    Error, Options, ResourceBinding, ResourceIndices, VertexAttribute, PUSH_CONSTANT_BINDING,
    PUSH_CONSTANT_DESCRIPTOR_SET, UNKNOWN_LOCATION,
};
use crate::back::glsl::{self, Backend, Dialect, EmitState, TexArgs};
use crate::{
    BaseType, DecorationFlags, Entity, ExecutionModeFlags, Expression, FastHashMap, FastHashSet,
    Id, IdSet, Instruction, Module, Terminator, Type,
};
use spirv::{BuiltIn, Dim, ExecutionModel, Op, StorageClass};
use std::collections::{BTreeMap, BTreeSet};

const STAGE_IN_VAR_NAME: &str = "in";
const STAGE_OUT_VAR_NAME: &str = "out";
const STAGE_UNIFORM_VAR_NAME: &str = "uniforms";
const SAMPLER_NAME_SUFFIX: &str = "Smplr";

/// Which flat Metal resource class a binding index belongs to.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ResourceClass {
    Buffer,
    Texture,
    Sampler,
}

/// A single MSL translation instance.
///
/// Owns the IR for the duration of the translation; the multi-pass driver
/// in [`Writer::compile`] runs the interface transformations once, then
/// emits up to three times while discovery (image access directions,
/// late-registered helpers) forces recompilation.
pub struct Writer<'a> {
    module: Module,
    options: &'a Options,
    state: EmitState,
    vertex_attributes: &'a mut [VertexAttribute],
    resource_bindings: &'a mut [ResourceBinding],
    vtx_attr_by_location: FastHashMap<u32, usize>,

    stage_in_var_id: Id,
    stage_out_var_id: Id,
    stage_uniforms_var_id: Id,
    /// Secondary vertex input blocks, keyed by Metal buffer index.
    non_stage_in_input_var_ids: BTreeMap<u32, Id>,

    pub(super) custom_functions: BTreeSet<CustomFunction>,
    pragma_lines: BTreeSet<String>,
    header_lines: Vec<String>,
    struct_member_padding: PaddingMap,
    next_resource_index: ResourceIndices,

    active_input_builtins: FastHashSet<BuiltIn>,
    active_output_builtins: FastHashSet<BuiltIn>,
    active_interface_variables: IdSet,
    function_global_vars: FastHashMap<Id, BTreeSet<Id>>,
    /// Result-type map collected by the pre-scan, for facts that must be
    /// known before expressions exist.
    result_types: FastHashMap<u32, u32>,

    needs_vertex_index_arg: bool,
    needs_instance_index_arg: bool,
    /// Qualified name of the position output, for the vertex fix-ups.
    qual_pos_var_name: String,
    previous_instruction_opcode: Option<Op>,
    declared_structs: IdSet,
}

impl<'a> Writer<'a> {
    pub fn new(
        module: Module,
        options: &'a Options,
        vertex_attributes: &'a mut [VertexAttribute],
        resource_bindings: &'a mut [ResourceBinding],
    ) -> Self {
        let mut vtx_attr_by_location = FastHashMap::default();
        for (index, attr) in vertex_attributes.iter().enumerate() {
            vtx_attr_by_location.insert(attr.location, index);
        }
        Writer {
            module,
            options,
            state: EmitState::default(),
            vertex_attributes,
            resource_bindings,
            vtx_attr_by_location,
            stage_in_var_id: Id::NONE,
            stage_out_var_id: Id::NONE,
            stage_uniforms_var_id: Id::NONE,
            non_stage_in_input_var_ids: BTreeMap::new(),
            custom_functions: BTreeSet::new(),
            pragma_lines: BTreeSet::new(),
            header_lines: Vec::new(),
            struct_member_padding: PaddingMap::default(),
            next_resource_index: ResourceIndices::default(),
            active_input_builtins: FastHashSet::default(),
            active_output_builtins: FastHashSet::default(),
            active_interface_variables: IdSet::new(),
            function_global_vars: FastHashMap::default(),
            result_types: FastHashMap::default(),
            needs_vertex_index_arg: false,
            needs_instance_index_arg: false,
            qual_pos_var_name: String::new(),
            previous_instruction_opcode: None,
            declared_structs: IdSet::new(),
        }
    }

    /// Run the whole translation and return the MSL source.
    pub fn compile(mut self) -> Result<String, Error> {
        self.state.dialect = Dialect {
            float_literal_suffix: false,
            uint32_literal_suffix: true,
            basic_int_type: "int",
            basic_uint_type: "uint",
            discard_literal: "discard_fragment()",
            swizzle_is_function: false,
            use_initializer_list: true,
            native_row_major_matrix: false,
            force_temp_use_for_two_vector_shuffles: true,
        };

        self.replace_illegal_names();

        self.update_active_builtins();
        self.fixup_image_load_store_access();
        self.compute_active_interface_variables();

        // Pre-scan the opcodes for facts that influence header content and
        // helper-function emission.
        self.preprocess_op_codes();

        // Create structs to hold input, output and uniform variables.
        self.qual_pos_var_name = String::new();
        self.stage_in_var_id = self.add_interface_block(StorageClass::Input)?;
        self.stage_out_var_id = self.add_interface_block(StorageClass::Output)?;
        self.stage_uniforms_var_id = self.add_interface_block(StorageClass::UniformConstant)?;

        // Convert the use of global variables to recursively-passed
        // function parameters.
        self.localize_global_variables();
        self.extract_global_variables_from_functions();

        // Mark any non-stage-in structs to be tightly packed.
        self.mark_packable_structs();

        // Metal does not allow dynamic array lengths.
        if self.options.resolve_specialized_array_lengths {
            self.resolve_specialized_array_lengths();
        }

        let mut pass_count = 0;
        loop {
            if pass_count >= 3 {
                return Err(Error::CompilationLoop);
            }
            log::trace!("emission pass {pass_count}");
            self.reset_pass();

            self.emit_header();
            self.emit_specialization_constants()?;
            self.emit_resources()?;
            self.emit_custom_functions()?;
            let entry = self.module.entry_point.function;
            glsl::base_emit_function(&mut self, entry)?;

            pass_count += 1;
            if !self.state.force_recompile {
                break;
            }
            log::debug!("emission discovered new facts, recompiling");
        }

        Ok(std::mem::take(&mut self.state.buffer))
    }

    /// Restore per-pass state; only the helper registry, pragma lines and
    /// the ID bound survive a retry.
    fn reset_pass(&mut self) {
        self.module.reset_expressions();
        self.state.buffer.clear();
        self.state.indent = 0;
        self.state.current_function = Id::NONE;
        self.state.processing_entry_point = false;
        self.state.forced_temporaries.clear();
        self.state.emitted_functions.clear();
        self.state.loop_stack.clear();
        self.state.force_recompile = false;
        self.next_resource_index = ResourceIndices::default();
        self.previous_instruction_opcode = None;
        self.declared_structs.clear();
    }

    /// Replace all names that match MSL keywords or Metal Standard Library
    /// functions.
    fn replace_illegal_names(&mut self) {
        for index in 0..self.module.bound() {
            let id = Id(index);
            match *self.module.entity(id) {
                Entity::Variable(_) => {
                    let alias = &mut self.module.meta_mut(id).decoration.alias;
                    if keywords::is_reserved_keyword(alias) {
                        alias.push('0');
                    }
                }
                Entity::Function(_) => {
                    let alias = &mut self.module.meta_mut(id).decoration.alias;
                    if keywords::is_reserved_function(alias) {
                        alias.push('0');
                    }
                }
                Entity::Type(_) => {
                    for dec in self.module.meta_mut(id).members.iter_mut() {
                        if keywords::is_reserved_keyword(&dec.alias) {
                            dec.alias.push('0');
                        }
                    }
                }
                _ => {}
            }
        }

        // Keep the entry point name and its alias in sync.
        if keywords::is_reserved_function(&self.module.entry_point.name) {
            self.module.entry_point.name.push('0');
        }
        let name = self.module.entry_point.name.clone();
        let function = self.module.entry_point.function;
        self.module.set_name(function, name);
    }

    /// Record which builtins the shader actually reads or writes, so
    /// inactive block members can be dropped from the interface structs.
    fn update_active_builtins(&mut self) {
        self.active_input_builtins.clear();
        self.active_output_builtins.clear();

        let mut accesses: Vec<(Id, Option<u32>)> = Vec::new();
        for (_, entity) in self.module.iter() {
            let Entity::Block(ref block) = *entity else {
                continue;
            };
            for inst in &block.instructions {
                match inst.op {
                    Op::Load => accesses.push((inst.id_operand(2), None)),
                    Op::Store => accesses.push((inst.id_operand(0), None)),
                    Op::AccessChain | Op::InBoundsAccessChain => {
                        let member = inst
                            .operands
                            .get(3)
                            .and_then(|&w| self.module.try_constant(Id(w)))
                            .map(|c| c.scalar());
                        accesses.push((inst.id_operand(2), member));
                    }
                    _ => {}
                }
            }
        }

        for (base, member) in accesses {
            let Some(var) = self.module.try_variable(base) else {
                continue;
            };
            let storage = var.storage;
            let dec = &self.module.meta(base).decoration;
            let builtin = if dec.flags.contains(DecorationFlags::BUILTIN) {
                dec.builtin
            } else {
                let value_type = self.module.ty(var.basetype).self_id;
                member.and_then(|m| {
                    self.module
                        .member_decoration(value_type, m)
                        .filter(|d| d.flags.contains(DecorationFlags::BUILTIN))
                        .and_then(|d| d.builtin)
                })
            };
            if let Some(builtin) = builtin {
                match storage {
                    StorageClass::Input => {
                        self.active_input_builtins.insert(builtin);
                    }
                    StorageClass::Output => {
                        self.active_output_builtins.insert(builtin);
                    }
                    _ => {}
                }
            }
        }
    }

    fn has_active_builtin(&self, builtin: BuiltIn, storage: StorageClass) -> bool {
        match storage {
            StorageClass::Input => self.active_input_builtins.contains(&builtin),
            StorageClass::Output => self.active_output_builtins.contains(&builtin),
            _ => false,
        }
    }

    /// Storage images without an explicit access qualifier start out marked
    /// neither readable nor writable; emission clears the marks as reads
    /// and writes are observed.
    fn fixup_image_load_store_access(&mut self) {
        let mut image_vars = Vec::new();
        for (id, entity) in self.module.iter() {
            if let Entity::Variable(ref var) = *entity {
                let ty = self.module.ty(var.basetype);
                let ty = self.module.ty(ty.self_id);
                if ty.base == BaseType::Image && ty.image.sampled == 2 && ty.image.access.is_none()
                {
                    image_vars.push(id);
                }
            }
        }
        for id in image_vars {
            self.module.set_decoration(
                id,
                DecorationFlags::NON_READABLE | DecorationFlags::NON_WRITABLE,
            );
        }
    }

    /// Collect the module-scope variables actually referenced by code; the
    /// interface blocks only aggregate active variables.
    fn compute_active_interface_variables(&mut self) {
        self.active_interface_variables.clear();
        let mut referenced: Vec<u32> = Vec::new();
        for (_, entity) in self.module.iter() {
            let Entity::Block(ref block) = *entity else {
                continue;
            };
            for inst in &block.instructions {
                let ops = &inst.operands;
                match inst.op {
                    Op::Store | Op::CopyMemory => referenced.extend(&ops[..2.min(ops.len())]),
                    Op::CompositeExtract => referenced.extend(ops.get(2)),
                    Op::CompositeInsert => referenced.extend(&ops[2..4.min(ops.len())]),
                    Op::ExtInst => {
                        referenced.extend(ops.get(2));
                        if ops.len() > 4 {
                            referenced.extend(&ops[4..]);
                        }
                    }
                    _ => {
                        if ops.len() > 2 {
                            referenced.extend(&ops[2..]);
                        }
                    }
                }
            }
            match block.terminator {
                Terminator::Return { value } => referenced.push(value.0),
                Terminator::BranchConditional { condition, .. } => referenced.push(condition.0),
                _ => {}
            }
        }
        for word in referenced {
            let id = Id(word);
            if self.module.try_variable(id).is_some() {
                self.active_interface_variables.insert(id);
            }
        }
    }

    fn is_hidden_variable(&self, var_id: Id, include_builtins: bool) -> bool {
        if self.module.has_decoration(var_id, DecorationFlags::BUILTIN) && !include_builtins {
            return true;
        }
        let storage = self.module.variable(var_id).storage;
        matches!(
            storage,
            StorageClass::Input | StorageClass::Output | StorageClass::UniformConstant
        ) && !self.active_interface_variables.contains(var_id)
    }

    fn add_custom_function(&mut self, function: CustomFunction) {
        if self.custom_functions.insert(function) {
            self.add_pragma_line("#pragma clang diagnostic ignored \"-Wmissing-prototypes\"");
        }
    }

    fn add_pragma_line(&mut self, line: &str) {
        self.pragma_lines.insert(line.to_string());
    }

    /// Register the need to output any custom functions, and collect the
    /// facts that influence header emission.
    fn preprocess_op_codes(&mut self) {
        let mut uses_atomics = false;
        let mut suppress_missing_prototypes = false;
        // Access-chain bases, so writes through chains reach the right
        // variable before expressions exist.
        let mut chain_bases: FastHashMap<u32, u32> = FastHashMap::default();
        let mut parameter_writes: Vec<u32> = Vec::new();
        let mut custom: Vec<CustomFunction> = Vec::new();

        let function_ids: Vec<Id> = self
            .module
            .iter()
            .filter_map(|(id, entity)| match *entity {
                Entity::Function(_) => Some(id),
                _ => None,
            })
            .collect();

        for func_id in function_ids {
            let blocks = self.module.function(func_id).blocks.clone();
            for block_id in blocks {
                let instructions = self.module.block(block_id).instructions.clone();
                for inst in &instructions {
                    let ops = &inst.operands;
                    match inst.op {
                        Op::FMod => custom.push(CustomFunction::Mod),
                        Op::FunctionCall => suppress_missing_prototypes = true,
                        Op::AccessChain | Op::InBoundsAccessChain => {
                            let base = *chain_bases.get(&ops[2]).unwrap_or(&ops[2]);
                            chain_bases.insert(ops[1], base);
                        }
                        Op::Store => {
                            let base = *chain_bases.get(&ops[0]).unwrap_or(&ops[0]);
                            parameter_writes.push(base);
                            // An array store needs the copy helper; the RHS
                            // type comes from the pre-scan's own records.
                            let rhs_is_constant =
                                self.module.try_constant(Id(ops[1])).is_some();
                            if !rhs_is_constant {
                                if let Some(&type_id) = self.result_types.get(&ops[1]) {
                                    if self.module.ty(Id(type_id)).is_array() {
                                        custom.push(CustomFunction::ArrayCopy);
                                    }
                                }
                            }
                        }
                        Op::AtomicExchange
                        | Op::AtomicCompareExchange
                        | Op::AtomicCompareExchangeWeak
                        | Op::AtomicLoad
                        | Op::AtomicIIncrement
                        | Op::AtomicIDecrement
                        | Op::AtomicIAdd
                        | Op::AtomicISub
                        | Op::AtomicSMin
                        | Op::AtomicUMin
                        | Op::AtomicSMax
                        | Op::AtomicUMax
                        | Op::AtomicAnd
                        | Op::AtomicOr
                        | Op::AtomicXor => {
                            uses_atomics = true;
                            let base = *chain_bases.get(&ops[2]).unwrap_or(&ops[2]);
                            parameter_writes.push(base);
                        }
                        Op::AtomicStore => {
                            uses_atomics = true;
                            let base = *chain_bases.get(&ops[0]).unwrap_or(&ops[0]);
                            parameter_writes.push(base);
                        }
                        Op::ExtInst => {
                            use spirv::GLOp;
                            match GLOp::from_u32(ops[3]) {
                                Some(GLOp::Radians) => custom.push(CustomFunction::Radians),
                                Some(GLOp::Degrees) => custom.push(CustomFunction::Degrees),
                                Some(GLOp::FindILsb) => custom.push(CustomFunction::FindILsb),
                                Some(GLOp::FindSMsb) => custom.push(CustomFunction::FindSMsb),
                                Some(GLOp::FindUMsb) => custom.push(CustomFunction::FindUMsb),
                                Some(GLOp::MatrixInverse) => {
                                    let columns = self.module.ty(Id(ops[0])).columns;
                                    match columns {
                                        2 => custom.push(CustomFunction::Inverse2x2),
                                        3 => custom.push(CustomFunction::Inverse3x3),
                                        4 => custom.push(CustomFunction::Inverse4x4),
                                        _ => {}
                                    }
                                }
                                _ => {}
                            }
                        }
                        _ => {}
                    }

                    // Track result types; stores and barriers have none.
                    match inst.op {
                        Op::Store
                        | Op::CopyMemory
                        | Op::CopyMemorySized
                        | Op::ImageWrite
                        | Op::AtomicStore
                        | Op::ControlBarrier
                        | Op::MemoryBarrier => {}
                        _ => {
                            if ops.len() > 1 {
                                self.result_types.insert(ops[1], ops[0]);
                            }
                        }
                    }
                }
            }
        }

        for word in parameter_writes {
            self.register_parameter_write(Id(word));
        }
        if !custom.is_empty() {
            suppress_missing_prototypes = true;
        }
        for function in custom {
            self.add_custom_function(function);
        }

        if suppress_missing_prototypes {
            self.add_pragma_line("#pragma clang diagnostic ignored \"-Wmissing-prototypes\"");
        }
        if uses_atomics {
            self.header_lines.push("#include <metal_atomic>".to_string());
            self.add_pragma_line("#pragma clang diagnostic ignored \"-Wunused-variable\"");
        }
    }

    /// A write through a function parameter clears its read-only status.
    fn register_parameter_write(&mut self, var_id: Id) {
        let Some(var) = self.module.try_variable(var_id) else {
            return;
        };
        if let Some((func, index)) = var.parameter {
            self.module.function_mut(func).parameters[index as usize].write_count += 1;
        }
    }

    /// If a vertex attribute exists at the location, mark it as used.
    fn mark_location_as_used_by_shader(&mut self, location: u32, storage: StorageClass) {
        if self.module.entry_point.model == ExecutionModel::Vertex
            && storage == StorageClass::Input
        {
            if let Some(&index) = self.vtx_attr_by_location.get(&location) {
                self.vertex_attributes[index].used_by_shader = true;
            }
        }
    }

    fn ensure_valid_name(name: String, prefix: &str) -> String {
        let bytes = name.as_bytes();
        if bytes.len() >= 2 && bytes[0] == b'_' && bytes[1].is_ascii_digit() {
            format!("{prefix}{name}")
        } else {
            name
        }
    }

    /// Add an interface structure for one storage class and return the ID
    /// of the synthesized variable, or the null ID if nothing qualifies.
    fn add_interface_block(&mut self, storage: StorageClass) -> Result<Id, Error> {
        // Accumulate the variables that should appear in the struct.
        let include_builtins = storage == StorageClass::Output;
        let mut vars = Vec::new();
        for (id, entity) in self.module.iter() {
            if let Entity::Variable(ref var) = *entity {
                let ty = self.module.ty(var.basetype);
                if var.storage == storage
                    && ty.pointer
                    && self.active_interface_variables.contains(id)
                    && !self.is_hidden_variable(id, include_builtins)
                {
                    vars.push(id);
                }
            }
        }
        if vars.is_empty() {
            return Ok(Id::NONE);
        }

        let first = self.module.increase_bound_by(3);
        let ib_type_id = first;
        let ib_var_id = Id(first.0 + 1);
        let initializer_id = Id(first.0 + 2);

        self.module.set_type(
            ib_type_id,
            Type {
                base: BaseType::Struct,
                storage: Some(storage),
                ..Type::default()
            },
        );
        self.module.set_decoration(ib_type_id, DecorationFlags::BLOCK);
        let mut var = crate::Variable::new(ib_type_id, storage);
        var.initializer = initializer_id;
        self.module.set_variable(ib_var_id, var);

        let ib_var_ref = match storage {
            StorageClass::Input => STAGE_IN_VAR_NAME,
            StorageClass::Output => {
                // The entry function returns the output struct from every
                // block that performs a function return.
                let entry = self.module.entry_point.function;
                self.module.function_mut(entry).add_local_variable(ib_var_id);
                let blocks = self.module.function(entry).blocks.clone();
                for block_id in blocks {
                    let block = self.module.block_mut(block_id);
                    if let Terminator::Return { ref mut value } = block.terminator {
                        *value = ib_var_id;
                    }
                }
                STAGE_OUT_VAR_NAME
            }
            StorageClass::UniformConstant => {
                self.active_interface_variables.insert(ib_var_id);
                STAGE_UNIFORM_VAR_NAME
            }
            _ => "",
        };

        let entry_name = self.module.entry_point.name.clone();
        self.module
            .set_name(ib_type_id, format!("{entry_name}_{ib_var_ref}"));
        self.module.set_name(ib_var_id, ib_var_ref);

        for var_id in vars {
            let type_id = self.module.variable(var_id).basetype;
            let ty = self.module.ty(type_id).clone();
            let value_type_id = ty.self_id;
            if ty.base == BaseType::Struct {
                // Flatten the struct members into the interface struct.
                for member in 0..ty.members.len() as u32 {
                    let member_type_id = ty.members[member as usize];
                    let member_dec = self
                        .module
                        .member_decoration(value_type_id, member)
                        .cloned()
                        .unwrap_or_default();
                    let is_builtin = member_dec.flags.contains(DecorationFlags::BUILTIN);
                    let builtin = member_dec.builtin;

                    let member_ty = self.module.ty(member_type_id).clone();
                    if self.should_move_to_input_buffer(&member_ty, is_builtin, storage)? {
                        self.move_member_to_input_buffer(&ty, member)?;
                        continue;
                    }
                    if is_builtin
                        && !builtin.is_some_and(|b| self.has_active_builtin(b, storage))
                    {
                        continue;
                    }

                    let source_name = if let Some(builtin) = builtin.filter(|_| is_builtin) {
                        self.builtin_to_name(builtin, storage)
                    } else {
                        let base = self.module.member_name(value_type_id, member);
                        let stripped = base.trim_start_matches('_');
                        format!("{}_{}", self.module.name(value_type_id), stripped)
                    };
                    let member_name = Self::ensure_valid_name(source_name, "m");
                    let qualified = format!("{ib_var_ref}.{member_name}");

                    let ib_member = self.push_interface_member(ib_type_id, member_type_id);
                    self.module
                        .set_member_name(ib_type_id, ib_member, member_name);
                    // Update the original member so every reference to it
                    // resolves to the new path.
                    for target in [type_id, value_type_id] {
                        let dec = self.module.member_decoration_mut(target, member);
                        dec.qualified_alias = qualified.clone();
                    }

                    let location = if member_dec.flags.contains(DecorationFlags::LOCATION) {
                        Some(member_dec.location)
                    } else if self.module.has_decoration(var_id, DecorationFlags::LOCATION) {
                        // A block-level location assigns members
                        // incrementing locations.
                        Some(self.module.meta(var_id).decoration.location + member)
                    } else {
                        None
                    };
                    if let Some(location) = location {
                        let dec = self.module.member_decoration_mut(ib_type_id, ib_member);
                        dec.location = location;
                        dec.flags |= DecorationFlags::LOCATION;
                        self.mark_location_as_used_by_shader(location, storage);
                    }
                    if let Some(builtin) = builtin.filter(|_| is_builtin) {
                        let dec = self.module.member_decoration_mut(ib_type_id, ib_member);
                        dec.builtin = Some(builtin);
                        dec.flags |= DecorationFlags::BUILTIN;
                        if builtin == BuiltIn::Position {
                            self.qual_pos_var_name = qualified.clone();
                        }
                    }
                }
            } else if self.module.ty(value_type_id).base.is_numeric() {
                let dec = self.module.meta(var_id).decoration.clone();
                let is_builtin = dec.flags.contains(DecorationFlags::BUILTIN);
                let builtin = dec.builtin;

                let value_ty = self.module.ty(value_type_id).clone();
                if self.should_move_to_input_buffer(&value_ty, is_builtin, storage)? {
                    self.move_to_input_buffer(var_id)?;
                    continue;
                }
                if is_builtin && !builtin.is_some_and(|b| self.has_active_builtin(b, storage)) {
                    continue;
                }

                let source_name = glsl::to_expression(self, var_id)?;
                let member_name = Self::ensure_valid_name(source_name, "m");
                let qualified = format!("{ib_var_ref}.{member_name}");

                let ib_member = self.push_interface_member(ib_type_id, type_id);
                self.module
                    .set_member_name(ib_type_id, ib_member, member_name);
                self.module.meta_mut(var_id).decoration.qualified_alias = qualified.clone();

                if dec.flags.contains(DecorationFlags::LOCATION) {
                    let location = dec.location;
                    let member_dec = self.module.member_decoration_mut(ib_type_id, ib_member);
                    member_dec.location = location;
                    member_dec.flags |= DecorationFlags::LOCATION;
                    self.mark_location_as_used_by_shader(location, storage);
                }
                if let Some(builtin) = builtin.filter(|_| is_builtin) {
                    let member_dec = self.module.member_decoration_mut(ib_type_id, ib_member);
                    member_dec.builtin = Some(builtin);
                    member_dec.flags |= DecorationFlags::BUILTIN;
                    if builtin == BuiltIn::Position {
                        self.qual_pos_var_name = qualified;
                    }
                }
            }
        }

        // Metal handles inputs better when sorted in reverse location
        // order; everything else sorts ascending.
        let aspect = if storage == StorageClass::Input {
            SortAspect::LocationReverse
        } else {
            SortAspect::Location
        };
        layout::sort_members(&mut self.module, ib_type_id, aspect);

        Ok(ib_var_id)
    }

    fn push_interface_member(&mut self, ib_type_id: Id, member_type_id: Id) -> u32 {
        let members = &mut self.module.ty_mut(ib_type_id).members;
        members.push(member_type_id);
        let index = members.len() as u32 - 1;
        // Materialize the decoration record so sorting stays in lock-step.
        self.module.member_decoration_mut(ib_type_id, index);
        index
    }

    /// Matrices and arrays cannot ride in a vertex `stage_in` struct; they
    /// divert to a buffer-backed block. In every other stage they are a
    /// hard error.
    fn should_move_to_input_buffer(
        &self,
        ty: &Type,
        is_builtin: bool,
        storage: StorageClass,
    ) -> Result<bool, Error> {
        if (ty.is_matrix() || ty.is_array()) && !is_builtin {
            match self.module.entry_point.model {
                ExecutionModel::Vertex => {
                    if storage == StorageClass::Input {
                        return Ok(true);
                    }
                    if storage == StorageClass::Output {
                        return Err(Error::VertexOutputMatrixOrArray);
                    }
                }
                ExecutionModel::Fragment => {
                    if storage == StorageClass::Input {
                        return Err(Error::FragmentInputMatrixOrArray);
                    }
                    if storage == StorageClass::Output {
                        return Err(Error::FragmentOutputMatrixOrArray);
                    }
                }
                _ => {}
            }
        }
        Ok(false)
    }

    fn move_to_input_buffer(&mut self, var_id: Id) -> Result<(), Error> {
        if !self.module.has_decoration(var_id, DecorationFlags::LOCATION) {
            return Ok(());
        }
        let member_type_id = self.module.variable(var_id).basetype;
        let source_name = glsl::to_expression(self, var_id)?;
        let member_name = Self::ensure_valid_name(source_name, "m");
        let location = self.module.meta(var_id).decoration.location;
        let qualified = self.add_input_buffer_block_member(member_type_id, member_name, location)?;
        self.module.meta_mut(var_id).decoration.qualified_alias = qualified;
        Ok(())
    }

    fn move_member_to_input_buffer(&mut self, ty: &Type, member: u32) -> Result<(), Error> {
        let type_id = ty.self_id;
        let Some(dec) = self.module.member_decoration(type_id, member) else {
            return Ok(());
        };
        if !dec.flags.contains(DecorationFlags::LOCATION) {
            return Ok(());
        }
        let location = dec.location;
        let member_type_id = ty.members[member as usize];
        let base = self.module.member_name(type_id, member);
        let stripped = base.trim_start_matches('_');
        let member_name = Self::ensure_valid_name(
            format!("{}_{}", self.module.name(type_id), stripped),
            "m",
        );
        let qualified = self.add_input_buffer_block_member(member_type_id, member_name, location)?;
        let dec = self.module.member_decoration_mut(type_id, member);
        dec.qualified_alias = qualified;
        Ok(())
    }

    /// Add a member to the input block corresponding to the Metal buffer
    /// that backs the attribute location, and return the member's access
    /// path.
    fn add_input_buffer_block_member(
        &mut self,
        member_type_id: Id,
        member_name: String,
        location: u32,
    ) -> Result<String, Error> {
        self.mark_location_as_used_by_shader(location, StorageClass::Input);

        let Some(&attr_index) = self.vtx_attr_by_location.get(&location) else {
            return Ok(String::new());
        };
        let (msl_buffer, msl_offset, msl_stride, per_instance) = {
            let attr = &self.vertex_attributes[attr_index];
            (attr.msl_buffer, attr.msl_offset, attr.msl_stride, attr.per_instance)
        };
        if per_instance {
            self.needs_instance_index_arg = true;
        } else {
            self.needs_vertex_index_arg = true;
        }

        let ib_var_id = self.input_buffer_block_var_id(msl_buffer);
        let ib_type_id = self.module.variable(ib_var_id).basetype;
        // The struct records its stride in its own offset decoration.
        let dec = &mut self.module.meta_mut(ib_type_id).decoration;
        dec.offset = msl_stride;
        dec.flags |= DecorationFlags::OFFSET;

        let ib_member = self.push_interface_member(ib_type_id, member_type_id);
        self.module
            .set_member_name(ib_type_id, ib_member, member_name.clone());
        let member_dec = self.module.member_decoration_mut(ib_type_id, ib_member);
        member_dec.binding = msl_buffer;
        member_dec.offset = msl_offset;
        member_dec.location = UNKNOWN_LOCATION;
        member_dec.flags |=
            DecorationFlags::BINDING | DecorationFlags::OFFSET | DecorationFlags::LOCATION;

        let index_builtin = if per_instance {
            BuiltIn::InstanceIndex
        } else {
            BuiltIn::VertexIndex
        };
        let index_name = self.builtin_to_name(index_builtin, StorageClass::Input);
        let block_name = self.module.name(ib_var_id).to_string();
        Ok(format!("{block_name}[{index_name}].{member_name}"))
    }

    /// The input block using the given Metal buffer index, lazily created.
    fn input_buffer_block_var_id(&mut self, msl_buffer: u32) -> Id {
        if let Some(&existing) = self.non_stage_in_input_var_ids.get(&msl_buffer) {
            return existing;
        }
        let first = self.module.increase_bound_by(3);
        let ib_type_id = first;
        let ib_var_id = Id(first.0 + 1);
        let initializer_id = Id(first.0 + 2);

        self.module.set_type(
            ib_type_id,
            Type {
                base: BaseType::Struct,
                storage: Some(StorageClass::Input),
                ..Type::default()
            },
        );
        self.module.set_decoration(ib_type_id, DecorationFlags::BLOCK);
        let mut var = crate::Variable::new(ib_type_id, StorageClass::Input);
        var.initializer = initializer_id;
        self.module.set_variable(ib_var_id, var);

        let var_name = format!("{STAGE_IN_VAR_NAME}{msl_buffer}");
        let entry_name = self.module.entry_point.name.clone();
        self.module.set_name(ib_type_id, format!("{entry_name}_{var_name}"));
        self.module.set_name(ib_var_id, var_name);

        self.non_stage_in_input_var_ids.insert(msl_buffer, ib_var_id);
        ib_var_id
    }

    /// Move the Private and Workgroup global variables to the entry
    /// function; non-constant variables cannot have global scope in Metal.
    fn localize_global_variables(&mut self) {
        let mut locals = Vec::new();
        for (id, entity) in self.module.iter() {
            if let Entity::Variable(ref var) = *entity {
                if matches!(var.storage, StorageClass::Private | StorageClass::Workgroup) {
                    locals.push(id);
                }
            }
        }
        let entry = self.module.entry_point.function;
        for id in locals {
            // The pointer type keeps its storage class, which still drives
            // the `threadgroup` qualifier on the declaration.
            self.module.variable_mut(id).storage = StorageClass::Function;
            self.module.function_mut(entry).add_local_variable(id);
        }
    }

    /// For any global variable accessed directly by a function, add that
    /// variable as an argument to the function and to its callers.
    fn extract_global_variables_from_functions(&mut self) {
        let mut global_var_ids = IdSet::new();
        for (id, entity) in self.module.iter() {
            if let Entity::Variable(ref var) = *entity {
                if matches!(
                    var.storage,
                    StorageClass::Input
                        | StorageClass::Uniform
                        | StorageClass::UniformConstant
                        | StorageClass::PushConstant
                        | StorageClass::StorageBuffer
                ) {
                    global_var_ids.insert(id);
                }
            }
        }
        // Entry-function locals (localized globals among them) are also
        // reached by callees.
        let entry = self.module.entry_point.function;
        for &id in &self.module.function(entry).local_variables.clone() {
            global_var_ids.insert(id);
        }

        let mut processed = IdSet::new();
        self.extract_global_variables_from_function(entry, &global_var_ids, &mut processed);
    }

    fn extract_global_variables_from_function(
        &mut self,
        func_id: Id,
        global_var_ids: &IdSet,
        processed: &mut IdSet,
    ) -> BTreeSet<Id> {
        if processed.contains(func_id) {
            return self
                .function_global_vars
                .get(&func_id)
                .cloned()
                .unwrap_or_default();
        }
        processed.insert(func_id);

        let mut added: BTreeSet<Id> = BTreeSet::new();
        let blocks = self.module.function(func_id).blocks.clone();
        for block_id in blocks {
            let instructions = self.module.block(block_id).instructions.clone();
            for inst in &instructions {
                let ops = &inst.operands;
                match inst.op {
                    Op::Load | Op::AccessChain | Op::InBoundsAccessChain => {
                        let base = Id(ops[2]);
                        if global_var_ids.contains(base) {
                            added.insert(base);
                        }
                    }
                    Op::FunctionCall => {
                        for &arg in &ops[3..] {
                            if global_var_ids.contains(Id(arg)) {
                                added.insert(Id(arg));
                            }
                        }
                        let inner =
                            self.extract_global_variables_from_function(
                                Id(ops[2]),
                                global_var_ids,
                                processed,
                            );
                        added.extend(inner);
                    }
                    _ => {}
                }
            }
        }

        self.function_global_vars.insert(func_id, added.clone());

        // Add the reached globals as parameters of every non-entry
        // function, aliasing the original variable's metadata.
        if func_id != self.module.entry_point.function {
            let first = self.module.increase_bound_by(added.len() as u32);
            let mut next_id = first;
            for (param_offset, &global) in added.iter().enumerate() {
                let type_id = self.module.variable(global).basetype;
                let param_index =
                    self.module.function(func_id).parameters.len() as u32;
                self.module
                    .function_mut(func_id)
                    .add_parameter(type_id, next_id, true);
                let mut var = crate::Variable::new(type_id, StorageClass::Function);
                var.basevariable = global;
                var.parameter = Some((func_id, param_index));
                self.module.set_variable(next_id, var);

                let name = self.to_name(global);
                self.module
                    .set_name(global, Self::ensure_valid_name(name, "v"));
                self.module.copy_meta(global, next_id);

                next_id = Id(first.0 + param_offset as u32 + 1);
            }
        }
        added
    }

    /// Mark the structs behind uniform-like block variables, and everything
    /// nested in them, as tightly packed.
    fn mark_packable_structs(&mut self) {
        let mut roots = Vec::new();
        for (id, entity) in self.module.iter() {
            if let Entity::Variable(ref var) = *entity {
                if var.storage == StorageClass::Function || self.is_hidden_variable(id, false) {
                    continue;
                }
                let ty = self.module.ty(var.basetype);
                if ty.pointer
                    && matches!(
                        ty.storage,
                        Some(
                            StorageClass::Uniform
                                | StorageClass::UniformConstant
                                | StorageClass::PushConstant
                                | StorageClass::StorageBuffer
                        )
                    )
                    && (self.module.has_decoration(
                        ty.self_id,
                        DecorationFlags::BLOCK,
                    ) || self
                        .module
                        .has_decoration(ty.self_id, DecorationFlags::BUFFER_BLOCK))
                {
                    roots.push(ty.self_id);
                }
            }
        }
        for root in roots {
            self.mark_as_packable(root);
        }
    }

    fn mark_as_packable(&mut self, type_id: Id) {
        let ty = self.module.ty(type_id);
        if ty.base != BaseType::Struct {
            return;
        }
        let members: Vec<Id> = ty.members.iter().map(|&m| self.module.ty(m).self_id).collect();
        self.module.set_decoration(type_id, DecorationFlags::C_PACKED);
        for member in members {
            self.mark_as_packable(member);
        }
    }

    /// Turn off specialization of any constants used as array lengths.
    fn resolve_specialized_array_lengths(&mut self) {
        for index in 0..self.module.bound() {
            let id = Id(index);
            if let Entity::Constant(ref c) = *self.module.entity(id) {
                if c.is_used_as_array_length && c.specialization {
                    match *self.module.entity_mut(id) {
                        Entity::Constant(ref mut c) => c.specialization = false,
                        _ => unreachable!(),
                    }
                }
            }
        }
    }

    fn emit_header(&mut self) {
        let pragmas: Vec<String> = self.pragma_lines.iter().cloned().collect();
        for pragma in &pragmas {
            glsl::statement(self, pragma);
        }
        if !pragmas.is_empty() {
            glsl::statement(self, "");
        }
        glsl::statement(self, "#include <metal_stdlib>");
        glsl::statement(self, "#include <simd/simd.h>");
        let headers = self.header_lines.clone();
        for header in &headers {
            glsl::statement(self, header);
        }
        glsl::statement(self, "");
        glsl::statement(self, "using namespace metal;");
        glsl::statement(self, "");
    }

    /// Emit declarations for the specialization Metal function constants.
    fn emit_specialization_constants(&mut self) -> Result<(), Error> {
        let mut spec_constants = Vec::new();
        let mut workgroup_size_id = Id::NONE;
        for (id, entity) in self.module.iter() {
            if let Entity::Constant(ref c) = *entity {
                let dec = &self.module.meta(id).decoration;
                if dec.builtin == Some(BuiltIn::WorkgroupSize) {
                    workgroup_size_id = id;
                    continue;
                }
                if c.specialization {
                    spec_constants.push(id);
                }
            }
        }

        for &id in &spec_constants {
            let constant = self.module.constant(id).clone();
            let ty = self.module.ty(constant.constant_type).clone();
            let type_name = self.type_to_glsl(&ty, Id::NONE);
            let name = self.to_name(id);
            let value = glsl::constant_expression(self, &constant)?;
            if ty.is_scalar() && ty.base != BaseType::Struct {
                // Only scalar values can be function constants.
                let spec_id = self.module.meta(id).decoration.spec_id;
                let tmp_name = format!("{name}_tmp");
                glsl::statement(
                    self,
                    format!(
                        "constant {type_name} {tmp_name} [[function_constant({spec_id})]];"
                    ),
                );
                glsl::statement(
                    self,
                    format!(
                        "constant {type_name} {name} = is_function_constant_defined({tmp_name}) ? {tmp_name} : {value};"
                    ),
                );
            } else {
                // Composite specialization constants are built from other
                // specialization constants.
                glsl::statement(self, format!("constant {type_name} {name} = {value};"));
            }
        }

        if workgroup_size_id.is_some() {
            let constant = self.module.constant(workgroup_size_id).clone();
            let value = glsl::constant_expression(self, &constant)?;
            let name = self.builtin_to_name(BuiltIn::WorkgroupSize, StorageClass::Workgroup);
            glsl::statement(self, format!("constant uint3 {name} = {value};"));
        }

        if !spec_constants.is_empty() || workgroup_size_id.is_some() {
            glsl::statement(self, "");
        }
        Ok(())
    }

    /// Undefined global memory is not allowed in MSL; declare constants
    /// initialized to zeros.
    fn declare_undefined_values(&mut self) -> Result<(), Error> {
        let undefs: Vec<Id> = self
            .module
            .iter()
            .filter_map(|(id, entity)| match *entity {
                Entity::Undef(_) => Some(id),
                _ => None,
            })
            .collect();
        let emitted = !undefs.is_empty();
        for id in undefs {
            let basetype = match *self.module.entity(id) {
                Entity::Undef(ref undef) => undef.basetype,
                _ => unreachable!(),
            };
            let ty = {
                let t = self.module.ty(basetype);
                self.module.ty(t.self_id).clone()
            };
            let name = self.to_name(id);
            let decl = glsl::variable_decl(self, &ty, &name, id)?;
            glsl::statement(self, format!("constant {decl} = {{}};"));
        }
        if emitted {
            glsl::statement(self, "");
        }
        Ok(())
    }

    fn emit_resources(&mut self) -> Result<(), Error> {
        // Output non-interface structs: local function structs and structs
        // nested within uniform and read-write buffers.
        let type_ids: Vec<Id> = self
            .module
            .iter()
            .filter_map(|(id, entity)| match *entity {
                Entity::Type(_) => Some(id),
                _ => None,
            })
            .collect();
        for type_id in type_ids {
            let ty = self.module.ty(type_id).clone();
            let canonical = ty.self_id;
            let is_struct = ty.base == BaseType::Struct && ty.array.is_empty();
            let is_block = self.module.has_decoration(canonical, DecorationFlags::BLOCK)
                || self
                    .module
                    .has_decoration(canonical, DecorationFlags::BUFFER_BLOCK);
            let is_interface = matches!(
                ty.storage,
                Some(
                    StorageClass::Input
                        | StorageClass::Output
                        | StorageClass::UniformConstant
                )
            );
            let is_basic_struct = is_struct && !ty.pointer && !is_block;
            let is_non_interface_block = is_struct && ty.pointer && is_block && !is_interface;
            if !(is_basic_struct || is_non_interface_block) {
                continue;
            }
            if !self.declared_structs.insert(canonical) {
                continue;
            }
            if self.module.has_decoration(canonical, DecorationFlags::C_PACKED) {
                layout::align_struct(&mut self.module, canonical, &mut self.struct_member_padding)?;
            }
            self.emit_struct(canonical)?;
        }

        self.declare_undefined_values()?;

        // Output interface structs.
        self.emit_interface_block(self.stage_in_var_id)?;
        let buffer_blocks: Vec<Id> = self.non_stage_in_input_var_ids.values().copied().collect();
        for var_id in buffer_blocks {
            self.emit_interface_block(var_id)?;
        }
        self.emit_interface_block(self.stage_out_var_id)?;
        self.emit_interface_block(self.stage_uniforms_var_id)?;
        Ok(())
    }

    fn emit_interface_block(&mut self, var_id: Id) -> Result<(), Error> {
        if var_id.is_none() {
            return Ok(());
        }
        let type_id = self.module.variable(var_id).basetype;
        if self.module.meta(type_id).members.is_empty() {
            return Ok(());
        }
        self.emit_struct(type_id)
    }

    fn emit_struct(&mut self, type_id: Id) -> Result<(), Error> {
        let name = self.to_name(type_id);
        glsl::statement(self, format!("struct {name}"));
        glsl::begin_scope(self);
        let ty = self.module.ty(type_id).clone();
        for member in 0..ty.members.len() as u32 {
            self.emit_struct_member(&ty, member)?;
        }
        glsl::end_scope_decl(self);
        glsl::statement(self, "");
        Ok(())
    }

    /// Emit a structure member, padding and packing to maintain the
    /// correct member alignments.
    fn emit_struct_member(&mut self, ty: &Type, member: u32) -> Result<(), Error> {
        if let Some(&pad) = self.struct_member_padding.get(&(ty.self_id, member)) {
            glsl::statement(self, format!("char pad{member}[{pad}];"));
        }

        let member_type_id = ty.members[member as usize];
        let member_ty = self.module.ty(member_type_id).clone();
        let pack_prefix = if self
            .module
            .has_member_decoration(ty.self_id, member, DecorationFlags::C_PACKED)
        {
            "packed_"
        } else {
            ""
        };
        let type_name = self.type_to_glsl(&member_ty, Id::NONE);
        let member_name = {
            let name = self.module.member_name(ty.self_id, member);
            if name.is_empty() {
                format!("_m{member}")
            } else {
                name.to_string()
            }
        };
        let qualifier = self.member_attribute_qualifier(ty, member)?;
        let array_suffix = glsl::type_to_array_glsl(self, &member_ty)?;
        glsl::statement(
            self,
            format!("{pack_prefix}{type_name} {member_name}{qualifier}{array_suffix};"),
        );
        Ok(())
    }

    /// The location of a member: its explicit decoration, or its index
    /// within the struct when the members are already in location order.
    fn ordered_member_location(&self, type_id: Id, member: u32) -> u32 {
        match self.module.member_decoration(type_id, member) {
            Some(dec) if dec.flags.contains(DecorationFlags::LOCATION) => dec.location,
            _ => member,
        }
    }

    /// The return type declaration of a function, prefixed with the entry
    /// kind when this is the entry point.
    fn func_type_decl(&self, return_ty: &Type) -> String {
        let mut return_type = self.type_to_glsl(return_ty, Id::NONE);
        if !self.state.processing_entry_point {
            return return_type;
        }
        if self.stage_out_var_id.is_some() {
            let out_type = self.module.variable(self.stage_out_var_id).basetype;
            return_type = self.to_name(out_type);
        }
        let flags = self.module.entry_point.flags;
        let entry_kind = match self.module.entry_point.model {
            ExecutionModel::Vertex => "vertex",
            ExecutionModel::Fragment => {
                if flags.contains(ExecutionModeFlags::EARLY_FRAGMENT_TESTS) {
                    "fragment [[ early_fragment_tests ]]"
                } else {
                    "fragment"
                }
            }
            ExecutionModel::GLCompute | ExecutionModel::Kernel => "kernel",
            _ => "unknown",
        };
        format!("{entry_kind} {return_type}")
    }

    /// The Metal index of the resource used by the variable: a matching
    /// user binding record if one exists, the automatic counter otherwise.
    fn metal_resource_index(&mut self, var_id: Id, class: ResourceClass) -> u32 {
        let stage = self.module.entry_point.model;
        let storage = self.module.variable(var_id).storage;
        let (desc_set, binding) = if storage == StorageClass::PushConstant {
            (PUSH_CONSTANT_DESCRIPTOR_SET, PUSH_CONSTANT_BINDING)
        } else {
            let dec = &self.module.meta(var_id).decoration;
            (dec.set, dec.binding)
        };

        for record in self.resource_bindings.iter_mut() {
            if record.stage == stage && record.desc_set == desc_set && record.binding == binding {
                record.used_by_shader = true;
                return match class {
                    ResourceClass::Buffer => record.msl_buffer,
                    ResourceClass::Texture => record.msl_texture,
                    ResourceClass::Sampler => record.msl_sampler,
                };
            }
        }

        let counter = match class {
            ResourceClass::Buffer => &mut self.next_resource_index.buffer,
            ResourceClass::Texture => &mut self.next_resource_index.texture,
            ResourceClass::Sampler => &mut self.next_resource_index.sampler,
        };
        let index = *counter;
        *counter += 1;
        index
    }

    /// The comma-delimited argument list of the entry point function.
    fn entry_point_args(&mut self, append_comma: bool) -> Result<String, Error> {
        let mut ep_args = String::new();

        // Stage-in structure.
        if self.stage_in_var_id.is_some() {
            let var_id = self.stage_in_var_id;
            let type_id = self.module.variable(var_id).basetype;
            let type_name = self.to_name(type_id);
            let var_name = self.to_name(var_id);
            ep_args.push_str(&format!("{type_name} {var_name} [[stage_in]]"));
        }

        // Secondary vertex attribute buffers.
        let buffer_blocks: Vec<(u32, Id)> = self
            .non_stage_in_input_var_ids
            .iter()
            .map(|(&index, &id)| (index, id))
            .collect();
        for (buffer_index, var_id) in buffer_blocks {
            if !ep_args.is_empty() {
                ep_args.push_str(", ");
            }
            let type_id = self.module.variable(var_id).basetype;
            let type_name = self.to_name(type_id);
            let var_name = self.to_name(var_id);
            ep_args.push_str(&format!(
                "device {type_name}* {var_name} [[buffer({buffer_index})]]"
            ));
        }

        // Uniform-like resources.
        let resource_vars: Vec<Id> = self
            .module
            .iter()
            .filter_map(|(id, entity)| match *entity {
                Entity::Variable(ref var)
                    if matches!(
                        var.storage,
                        StorageClass::Uniform
                            | StorageClass::UniformConstant
                            | StorageClass::PushConstant
                            | StorageClass::StorageBuffer
                    ) =>
                {
                    Some(id)
                }
                _ => None,
            })
            .collect();
        for var_id in resource_vars {
            if self.is_hidden_variable(var_id, false) {
                continue;
            }
            let type_id = self.module.variable(var_id).basetype;
            let ty = self.module.ty(type_id).clone();
            match ty.base {
                BaseType::Struct => {
                    if self.module.meta(ty.self_id).members.is_empty() {
                        continue;
                    }
                    let index = self.metal_resource_index(var_id, ResourceClass::Buffer);
                    let space = self.argument_address_space(var_id);
                    let type_name = self.type_to_glsl(&ty, Id::NONE);
                    let name = self.to_name(var_id);
                    if !ep_args.is_empty() {
                        ep_args.push_str(", ");
                    }
                    ep_args.push_str(&format!(
                        "{space} {type_name}& {name} [[buffer({index})]]"
                    ));
                }
                BaseType::Sampler => {
                    let index = self.metal_resource_index(var_id, ResourceClass::Sampler);
                    let name = self.to_name(var_id);
                    if !ep_args.is_empty() {
                        ep_args.push_str(", ");
                    }
                    ep_args.push_str(&format!("sampler {name} [[sampler({index})]]"));
                }
                BaseType::Image => {
                    let index = self.metal_resource_index(var_id, ResourceClass::Texture);
                    let type_name = self.type_to_glsl(&ty, var_id);
                    let name = self.to_name(var_id);
                    if !ep_args.is_empty() {
                        ep_args.push_str(", ");
                    }
                    ep_args.push_str(&format!("{type_name} {name} [[texture({index})]]"));
                }
                BaseType::SampledImage => {
                    let index = self.metal_resource_index(var_id, ResourceClass::Texture);
                    let type_name = self.type_to_glsl(&ty, var_id);
                    let name = self.to_name(var_id);
                    if !ep_args.is_empty() {
                        ep_args.push_str(", ");
                    }
                    ep_args.push_str(&format!("{type_name} {name} [[texture({index})]]"));
                    let dim = self.module.ty(ty.self_id).image.dim;
                    if dim != Dim::DimBuffer {
                        let sampler_index =
                            self.metal_resource_index(var_id, ResourceClass::Sampler);
                        let sampler_name = self.to_sampler_expression(var_id);
                        ep_args.push_str(&format!(
                            ", sampler {sampler_name} [[sampler({sampler_index})]]"
                        ));
                    }
                }
                _ => {}
            }
        }

        // Builtin inputs ride on the entry signature directly.
        let builtin_vars: Vec<Id> = self
            .module
            .iter()
            .filter_map(|(id, entity)| match *entity {
                Entity::Variable(ref var)
                    if var.storage == StorageClass::Input
                        && self.module.has_decoration(id, DecorationFlags::BUILTIN) =>
                {
                    Some(id)
                }
                _ => None,
            })
            .collect();
        for var_id in builtin_vars {
            let Some(builtin) = self.module.meta(var_id).decoration.builtin else {
                continue;
            };
            if !ep_args.is_empty() {
                ep_args.push_str(", ");
            }
            let type_name = Self::builtin_type_decl(builtin);
            let name = glsl::to_expression(self, var_id)?;
            let qualifier = self.builtin_qualifier(builtin)?;
            ep_args.push_str(&format!("{type_name} {name} [[{qualifier}]]"));
        }

        // Vertex and instance index builtins requested by attribute
        // buffers.
        if self.needs_vertex_index_arg {
            ep_args.push_str(&self.built_in_func_arg(BuiltIn::VertexIndex, !ep_args.is_empty())?);
        }
        if self.needs_instance_index_arg {
            ep_args
                .push_str(&self.built_in_func_arg(BuiltIn::InstanceIndex, !ep_args.is_empty())?);
        }

        if !ep_args.is_empty() && append_comma {
            ep_args.push_str(", ");
        }
        Ok(ep_args)
    }

    fn built_in_func_arg(&self, builtin: BuiltIn, prefix_comma: bool) -> Result<String, Error> {
        let mut arg = String::new();
        if prefix_comma {
            arg.push_str(", ");
        }
        arg.push_str(Self::builtin_type_decl(builtin));
        arg.push(' ');
        arg.push_str(&self.builtin_to_name(builtin, StorageClass::Input));
        arg.push_str(" [[");
        arg.push_str(self.builtin_qualifier(builtin)?);
        arg.push_str("]]");
        Ok(arg)
    }

    fn argument_decl(&self, param: &crate::Parameter) -> String {
        let var_id = param.id;
        let ptr_ty = self.module.ty(param.ty);
        let value_ty = self.module.ty(ptr_ty.self_id);
        let constref =
            !param.alias_global_variable && (!ptr_ty.pointer || param.write_count == 0);
        // Opaque handles are passed by value rather than reference.
        let pass_by_pointer = ptr_ty.storage == Some(StorageClass::UniformConstant);

        let mut decl = String::new();
        if constref {
            decl.push_str("const ");
        }
        let dec = &self.module.meta(var_id).decoration;
        if dec.flags.contains(DecorationFlags::BUILTIN) {
            if let Some(builtin) = dec.builtin {
                decl.push_str(Self::builtin_type_decl(builtin));
            }
        } else {
            decl.push_str(&self.type_to_glsl(ptr_ty, var_id));
        }
        if value_ty.is_array() {
            decl.push('*');
        } else if !pass_by_pointer {
            decl.push('&');
        }
        decl.push(' ');
        decl.push_str(&self.to_name(var_id));
        decl
    }

    /// A string usable as the sampler of an image: the sampler bound by
    /// `OpSampledImage` when there is one, a derived name otherwise.
    fn to_sampler_expression(&self, id: Id) -> String {
        let sampler = self.module.meta(id).sampler;
        if sampler.is_some() {
            match *self.module.entity(sampler) {
                Entity::Expression(ref e) => e.text.clone(),
                _ => glsl::base_to_name(self, sampler),
            }
        } else {
            format!("{}{SAMPLER_NAME_SUFFIX}", glsl::base_to_name(self, id))
        }
    }

    const fn builtin_type_decl(builtin: BuiltIn) -> &'static str {
        match builtin {
            // Vertex function in
            BuiltIn::VertexId | BuiltIn::VertexIndex => "uint",
            BuiltIn::InstanceId | BuiltIn::InstanceIndex => "uint",
            // Vertex function out
            BuiltIn::ClipDistance => "float",
            BuiltIn::PointSize => "float",
            BuiltIn::Position => "float4",
            BuiltIn::Layer => "uint",
            // Fragment function in
            BuiltIn::FrontFacing => "bool",
            BuiltIn::PointCoord => "float2",
            BuiltIn::FragCoord => "float4",
            BuiltIn::SampleId => "uint",
            BuiltIn::SampleMask => "uint",
            // Compute function in
            BuiltIn::GlobalInvocationId
            | BuiltIn::LocalInvocationId
            | BuiltIn::NumWorkgroups
            | BuiltIn::WorkgroupId => "uint3",
            BuiltIn::LocalInvocationIndex => "uint",
            _ => "unsupported-built-in-type",
        }
    }

    fn image_type_glsl(&self, ty: &Type, id: Id) -> String {
        // Bypass pointers; the image sub-record lives on the real type.
        let img = &self.module.ty(ty.self_id).image;
        let mut name = String::new();
        if img.depth {
            name.push_str(match img.dim {
                Dim::Dim1D => "depth1d_unsupported_by_metal",
                Dim::Dim2D => {
                    if img.ms {
                        "depth2d_ms"
                    } else if img.arrayed {
                        "depth2d_array"
                    } else {
                        "depth2d"
                    }
                }
                Dim::Dim3D => "depth3d_unsupported_by_metal",
                Dim::DimCube => {
                    if img.arrayed {
                        "depthcube_array"
                    } else {
                        "depthcube"
                    }
                }
                _ => "unknown_depth_texture_type",
            });
        } else {
            name.push_str(match img.dim {
                Dim::Dim1D => {
                    if img.arrayed {
                        "texture1d_array"
                    } else {
                        "texture1d"
                    }
                }
                Dim::DimBuffer | Dim::Dim2D => {
                    if img.ms {
                        "texture2d_ms"
                    } else if img.arrayed {
                        "texture2d_array"
                    } else {
                        "texture2d"
                    }
                }
                Dim::Dim3D => "texture3d",
                Dim::DimCube => {
                    if img.arrayed {
                        "texturecube_array"
                    } else {
                        "texturecube"
                    }
                }
                _ => "unknown_texture_type",
            });
        }

        name.push('<');
        let pixel_ty = self.module.ty(img.sampled_type).clone();
        name.push_str(&self.type_to_glsl(&pixel_ty, Id::NONE));

        // For storage images, append the access qualifier; it may be
        // supplied by the module, or inferred from observed reads and
        // writes.
        if ty.base == BaseType::Image && img.sampled == 2 {
            use spirv::AccessQualifier;
            match img.access {
                Some(AccessQualifier::ReadOnly) => name.push_str(", access::read"),
                Some(AccessQualifier::WriteOnly) => name.push_str(", access::write"),
                Some(AccessQualifier::ReadWrite) => name.push_str(", access::read_write"),
                _ => {
                    let var_id = self.module.backing_variable_id(id);
                    if var_id.is_some()
                        && !self
                            .module
                            .has_decoration(var_id, DecorationFlags::NON_WRITABLE)
                    {
                        name.push_str(", access::");
                        if !self
                            .module
                            .has_decoration(var_id, DecorationFlags::NON_READABLE)
                        {
                            name.push_str("read_");
                        }
                        name.push_str("write");
                    }
                }
            }
        }

        name.push('>');
        name
    }

    fn binop(&mut self, ops: &[u32], op: &str) -> Result<(), Error> {
        glsl::emit_binary_op(self, Id(ops[0]), Id(ops[1]), Id(ops[2]), Id(ops[3]), op)
    }

    fn unary_func(&mut self, ops: &[u32], fname: &str) -> Result<(), Error> {
        glsl::emit_unary_func_op(self, Id(ops[0]), Id(ops[1]), Id(ops[2]), fname)
    }

    /// Emits one of the atomic functions; in MSL they operate on pointers
    /// cast into the matching `atomic_T` type.
    fn emit_atomic_func_op(
        &mut self,
        result_type: Id,
        result_id: Id,
        op: &str,
        obj: Id,
        compare: Option<Id>,
        value: Option<String>,
        has_mem_order_2: bool,
    ) -> Result<(), Error> {
        if result_id.is_some() {
            self.state.forced_temporaries.insert(result_id);
        }

        let value_ty = {
            let t = self.module.expression_type(obj);
            self.module.ty(t.self_id).clone()
        };
        let obj_expr = glsl::to_expression(self, obj)?;
        let mut exp = format!(
            "{op}((volatile device atomic_{}*)&({obj_expr})",
            self.type_to_glsl(&value_ty, Id::NONE)
        );

        if let Some(compare) = compare {
            // The compare value must be addressable; spill it.
            let compare_ty = {
                let t = self.module.expression_type(compare);
                self.module.ty(t.self_id).clone()
            };
            let tmp_name = format!("_{}_tmp", compare.0);
            let decl = glsl::variable_decl(self, &compare_ty, &tmp_name, Id::NONE)?;
            let compare_expr = glsl::to_expression(self, compare)?;
            glsl::statement(self, format!("{decl} = {compare_expr};"));
            exp.push_str(&format!(", &({tmp_name})"));
        }
        if let Some(value) = value {
            exp.push_str(", ");
            exp.push_str(&value);
        }
        exp.push_str(", ");
        exp.push_str(Self::memory_order());
        if has_mem_order_2 {
            exp.push_str(", ");
            exp.push_str(Self::memory_order());
        }
        exp.push(')');

        if result_id.is_some() {
            glsl::emit_op(self, result_type, result_id, exp, false)
        } else {
            glsl::statement(self, format!("{exp};"));
            Ok(())
        }
    }

    /// Metal only supports relaxed memory order for now.
    const fn memory_order() -> &'static str {
        "memory_order_relaxed"
    }

    fn emit_barrier(&mut self, exe_scope: Id, mem_scope: Id, mem_sem: Id) -> Result<(), Error> {
        if self.module.entry_point.model != ExecutionModel::GLCompute {
            return Ok(());
        }

        let semantics = match self.module.try_constant(mem_sem) {
            Some(c) => spirv::MemorySemantics::from_bits_truncate(c.scalar()),
            None => spirv::MemorySemantics::NONE,
        };
        let mut stmt = String::from("threadgroup_barrier(mem_flags::");
        stmt.push_str(
            if semantics.contains(spirv::MemorySemantics::CROSS_WORKGROUP_MEMORY) {
                "mem_device"
            } else if semantics.intersects(
                spirv::MemorySemantics::SUBGROUP_MEMORY
                    | spirv::MemorySemantics::WORKGROUP_MEMORY
                    | spirv::MemorySemantics::ATOMIC_COUNTER_MEMORY,
            ) {
                "mem_threadgroup"
            } else if semantics.contains(spirv::MemorySemantics::IMAGE_MEMORY) {
                "mem_texture"
            } else {
                "mem_none"
            },
        );

        if self.options.is_ios() && self.options.supports_msl_version(2, 0) {
            stmt.push_str(", ");
            // Use the wider of the two scopes (the smaller value).
            let scope_of = |id: Id| -> u32 {
                match self.module.try_constant(id) {
                    Some(c) => c.scalar(),
                    None => spirv::Scope::Invocation as u32,
                }
            };
            let scope = scope_of(exe_scope).min(scope_of(mem_scope));
            stmt.push_str(if scope <= spirv::Scope::Device as u32 {
                "memory_scope_device"
            } else if scope >= spirv::Scope::Subgroup as u32 {
                "memory_scope_simdgroup"
            } else {
                "memory_scope_threadgroup"
            });
        }

        stmt.push_str(");");
        glsl::statement(self, stmt);
        Ok(())
    }

    /// The stage_in struct was flattened, so an assignment of a whole
    /// Input struct must copy member by member through the qualified
    /// aliases. Returns whether the assignment was emitted.
    fn maybe_emit_input_struct_assignment(&mut self, lhs: Id, rhs: Id) -> Result<bool, Error> {
        let rhs_type_id = {
            let t = self.module.expression_type(rhs);
            t.self_id
        };
        if self.module.ty(rhs_type_id).base != BaseType::Struct {
            return Ok(false);
        }
        let Some(rhs_var_id) = Some(self.module.backing_variable_id(rhs)).filter(|id| id.is_some())
        else {
            return Ok(false);
        };
        let rhs_var = self.module.variable(rhs_var_id).clone();
        if rhs_var.storage != StorageClass::Input {
            return Ok(false);
        }

        let lhs_expr = glsl::to_expression(self, lhs)?;
        let rhs_name = self.to_name(rhs_var_id);
        let member_count = self.module.ty(rhs_type_id).members.len() as u32;
        for member in 0..member_count {
            let member_name = {
                let name = self.module.member_name(rhs_type_id, member);
                if name.is_empty() {
                    format!("_m{member}")
                } else {
                    name.to_string()
                }
            };
            // The qualified member names live on the variable's own
            // (pointer) type.
            let qualified = self
                .module
                .member_decoration(rhs_var.basetype, member)
                .map(|dec| dec.qualified_alias.clone())
                .filter(|name| !name.is_empty());
            let rhs_member = match qualified {
                Some(path) => path,
                None => format!("{rhs_name}.{member_name}"),
            };
            glsl::statement(self, format!("{lhs_expr}.{member_name} = {rhs_member};"));
        }
        Ok(true)
    }

    /// MSL does not support array assignment; whole-array stores call the
    /// copy helper instead. Returns whether the store was emitted.
    fn maybe_emit_array_assignment(&mut self, lhs: Id, rhs: Id) -> Result<bool, Error> {
        if self.module.try_constant(rhs).is_some() {
            // Assignment from an array initializer is fine.
            return Ok(false);
        }
        let ty = {
            let t = self.module.expression_type(rhs);
            self.module.ty(t.self_id).clone()
        };
        if !ty.is_array() {
            return Ok(false);
        }
        let lhs_expr = glsl::to_expression(self, lhs)?;
        let rhs_expr = glsl::to_expression(self, rhs)?;
        let count = glsl::to_array_size(self, &ty, 0)?;
        glsl::statement(self, format!("spvArrayCopy({lhs_expr}, {rhs_expr}, {count});"));
        Ok(true)
    }

    fn emit_image_query_size(&mut self, inst: &Instruction) -> Result<(), Error> {
        let ops = &inst.operands;
        let result_type = Id(ops[0]);
        let id = Id(ops[1]);
        let img = Id(ops[2]);

        let (dim, arrayed) = {
            let t = self.module.expression_type(img);
            let img_ty = self.module.ty(t.self_id);
            if img_ty.base != BaseType::Image && img_ty.base != BaseType::SampledImage {
                return Err(Error::InvalidImageQuery);
            }
            (img_ty.image.dim, img_ty.image.arrayed)
        };

        let img_expr = glsl::to_expression(self, img)?;
        let lod = if inst.op == Op::ImageQuerySizeLod {
            // Level zero is the default; don't bother printing it.
            let lod_expr = glsl::to_expression(self, Id(ops[3]))?;
            if lod_expr == "0" {
                String::new()
            } else {
                lod_expr
            }
        } else {
            String::new()
        };

        let result_ty = self.module.ty(result_type).clone();
        let mut expr = format!("{}({img_expr}.get_width({lod})", self.type_to_glsl(&result_ty, Id::NONE));
        if matches!(dim, Dim::Dim2D | Dim::DimCube | Dim::Dim3D) {
            expr.push_str(&format!(", {img_expr}.get_height({lod})"));
        }
        if dim == Dim::Dim3D {
            expr.push_str(&format!(", {img_expr}.get_depth({lod})"));
        }
        if arrayed {
            expr.push_str(&format!(", {img_expr}.get_array_size()"));
        }
        expr.push(')');

        let forward = glsl::should_forward(self, img);
        glsl::emit_op(self, result_type, id, expr, forward)
    }

    fn emit_image_query(&mut self, inst: &Instruction, what: &str) -> Result<(), Error> {
        let ops = &inst.operands;
        let result_type = Id(ops[0]);
        let id = Id(ops[1]);
        let img = Id(ops[2]);
        let img_expr = glsl::to_expression(self, img)?;
        let result_ty = self.module.ty(result_type).clone();
        let expr = format!(
            "{}({img_expr}.get_num_{what}())",
            self.type_to_glsl(&result_ty, Id::NONE)
        );
        let forward = glsl::should_forward(self, img);
        glsl::emit_op(self, result_type, id, expr, forward)
    }

    /// Texture coordinates of fetches must be integral; round any floating
    /// point coordinate expression first.
    fn round_fp_tex_coords(coords: String, coord_is_fp: bool) -> String {
        if coord_is_fp {
            format!("round({coords})")
        } else {
            coords
        }
    }

    /// A gather component argument; the ID must be a scalar constant.
    fn to_component_argument(&self, id: Id) -> Result<&'static str, Error> {
        let Some(constant) = self.module.try_constant(id) else {
            return Err(Error::ExpectedConstant(id));
        };
        Ok(match constant.scalar() {
            0 => "component::x",
            1 => "component::y",
            2 => "component::z",
            3 => "component::w",
            other => return Err(Error::InvalidComponentIndex(other)),
        })
    }
}

impl<'a> Backend for Writer<'a> {
    fn module(&self) -> &Module {
        &self.module
    }

    fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    fn state(&self) -> &EmitState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EmitState {
        &mut self.state
    }

    /// MSL-specific rewrites; everything else falls through to the
    /// GLSL-family base behavior.
    fn emit_instruction(&mut self, inst: &Instruction) -> Result<(), Error> {
        let ops = &inst.operands;
        match inst.op {
            // Comparisons
            Op::IEqual | Op::LogicalEqual | Op::FOrdEqual => self.binop(ops, "==")?,
            Op::INotEqual | Op::LogicalNotEqual | Op::FOrdNotEqual => self.binop(ops, "!=")?,
            Op::UGreaterThan | Op::SGreaterThan | Op::FOrdGreaterThan => self.binop(ops, ">")?,
            Op::UGreaterThanEqual | Op::SGreaterThanEqual | Op::FOrdGreaterThanEqual => {
                self.binop(ops, ">=")?
            }
            Op::ULessThan | Op::SLessThan | Op::FOrdLessThan => self.binop(ops, "<")?,
            Op::ULessThanEqual | Op::SLessThanEqual | Op::FOrdLessThanEqual => {
                self.binop(ops, "<=")?
            }

            // Derivatives
            Op::DPdx | Op::DPdxFine | Op::DPdxCoarse => self.unary_func(ops, "dfdx")?,
            Op::DPdy | Op::DPdyFine | Op::DPdyCoarse => self.unary_func(ops, "dfdy")?,

            // Bitfield
            Op::BitFieldInsert => {
                let ids = [Id(ops[2]), Id(ops[3]), Id(ops[4]), Id(ops[5])];
                glsl::emit_nary_func_op(self, Id(ops[0]), Id(ops[1]), &ids, "insert_bits")?
            }
            Op::BitFieldSExtract | Op::BitFieldUExtract => {
                let ids = [Id(ops[2]), Id(ops[3]), Id(ops[4])];
                glsl::emit_nary_func_op(self, Id(ops[0]), Id(ops[1]), &ids, "extract_bits")?
            }
            Op::BitReverse => self.unary_func(ops, "reverse_bits")?,
            Op::BitCount => self.unary_func(ops, "popcount")?,

            // Atomics
            Op::AtomicExchange => {
                let value = glsl::to_expression(self, Id(ops[5]))?;
                self.emit_atomic_func_op(
                    Id(ops[0]),
                    Id(ops[1]),
                    "atomic_exchange_explicit",
                    Id(ops[2]),
                    None,
                    Some(value),
                    false,
                )?
            }
            Op::AtomicCompareExchange | Op::AtomicCompareExchangeWeak => {
                let value = glsl::to_expression(self, Id(ops[6]))?;
                self.emit_atomic_func_op(
                    Id(ops[0]),
                    Id(ops[1]),
                    "atomic_compare_exchange_weak_explicit",
                    Id(ops[2]),
                    Some(Id(ops[7])),
                    Some(value),
                    true,
                )?
            }
            Op::AtomicLoad => self.emit_atomic_func_op(
                Id(ops[0]),
                Id(ops[1]),
                "atomic_load_explicit",
                Id(ops[2]),
                None,
                None,
                false,
            )?,
            Op::AtomicStore => {
                // Pointer, semantics and value per the SPIR-V operand
                // layout.
                let value = glsl::to_expression(self, Id(ops[3]))?;
                self.emit_atomic_func_op(
                    Id::NONE,
                    Id::NONE,
                    "atomic_store_explicit",
                    Id(ops[0]),
                    None,
                    Some(value),
                    false,
                )?
            }
            Op::AtomicIIncrement | Op::AtomicIDecrement => {
                let op = if inst.op == Op::AtomicIIncrement {
                    "atomic_fetch_add_explicit"
                } else {
                    "atomic_fetch_sub_explicit"
                };
                self.emit_atomic_func_op(
                    Id(ops[0]),
                    Id(ops[1]),
                    op,
                    Id(ops[2]),
                    None,
                    Some("1".to_string()),
                    false,
                )?
            }
            Op::AtomicIAdd
            | Op::AtomicISub
            | Op::AtomicSMin
            | Op::AtomicUMin
            | Op::AtomicSMax
            | Op::AtomicUMax
            | Op::AtomicAnd
            | Op::AtomicOr
            | Op::AtomicXor => {
                let op = match inst.op {
                    Op::AtomicIAdd => "atomic_fetch_add_explicit",
                    Op::AtomicISub => "atomic_fetch_sub_explicit",
                    Op::AtomicSMin | Op::AtomicUMin => "atomic_fetch_min_explicit",
                    Op::AtomicSMax | Op::AtomicUMax => "atomic_fetch_max_explicit",
                    Op::AtomicAnd => "atomic_fetch_and_explicit",
                    Op::AtomicOr => "atomic_fetch_or_explicit",
                    _ => "atomic_fetch_xor_explicit",
                };
                let value = glsl::to_expression(self, Id(ops[5]))?;
                self.emit_atomic_func_op(
                    Id(ops[0]),
                    Id(ops[1]),
                    op,
                    Id(ops[2]),
                    None,
                    Some(value),
                    false,
                )?
            }

            // Images; reads are fetches in Metal.
            Op::ImageRead => {
                let var_id = self.module.backing_variable_id(Id(ops[2]));
                if var_id.is_some()
                    && self.module.has_decoration(var_id, DecorationFlags::NON_READABLE)
                {
                    // The image type already printed as write-only.
                    self.module
                        .unset_decoration(var_id, DecorationFlags::NON_READABLE);
                    self.state.force_recompile = true;
                }
                glsl::base_emit_texture_op(self, inst)?
            }
            Op::ImageWrite => {
                let img = Id(ops[0]);
                let var_id = self.module.backing_variable_id(img);
                if var_id.is_some()
                    && self.module.has_decoration(var_id, DecorationFlags::NON_WRITABLE)
                {
                    self.module
                        .unset_decoration(var_id, DecorationFlags::NON_WRITABLE);
                    self.state.force_recompile = true;
                }

                let mut args = TexArgs {
                    coord: Id(ops[1]),
                    ..TexArgs::default()
                };
                if ops.len() > 3 {
                    let mask = spirv::ImageOperands::from_bits_truncate(ops[3]);
                    let mut cursor = 4;
                    if mask.contains(spirv::ImageOperands::BIAS) {
                        args.bias = Id(ops[cursor]);
                        cursor += 1;
                    }
                    if mask.contains(spirv::ImageOperands::LOD) {
                        args.lod = Id(ops[cursor]);
                    }
                }
                let mut forward = false;
                let img_expr = glsl::to_expression(self, img)?;
                let texel_expr = glsl::to_expression(self, Id(ops[2]))?;
                let fargs = self.to_function_args(img, true, false, false, &args, &mut forward)?;
                glsl::statement(self, format!("{img_expr}.write({texel_expr}, {fargs});"));
            }
            Op::ImageQuerySize | Op::ImageQuerySizeLod => self.emit_image_query_size(inst)?,
            Op::ImageQueryLevels => self.emit_image_query(inst, "mip_levels")?,
            Op::ImageQuerySamples => self.emit_image_query(inst, "samples")?,

            // Casting
            Op::QuantizeToF16 => {
                let result_type = Id(ops[0]);
                let id = Id(ops[1]);
                let arg = Id(ops[2]);
                let vecsize = self.module.ty(result_type).vecsize;
                let (outer, inner) = match vecsize {
                    1 => ("float", "half"),
                    2 => ("float2", "half2"),
                    3 => ("float3", "half3"),
                    4 => ("float4", "half4"),
                    _ => return Err(Error::InvalidQuantizeWidth),
                };
                let arg_expr = glsl::to_expression(self, arg)?;
                let forward = glsl::should_forward(self, arg);
                glsl::emit_op(
                    self,
                    result_type,
                    id,
                    format!("{outer}({inner}({arg_expr}))"),
                    forward,
                )?
            }

            Op::Store => {
                if self.maybe_emit_input_struct_assignment(Id(ops[0]), Id(ops[1]))? {
                    // handled
                } else if self.maybe_emit_array_assignment(Id(ops[0]), Id(ops[1]))? {
                    // handled
                } else {
                    glsl::base_emit_instruction(self, inst)?
                }
            }

            // Compute barriers; in MSL a memory barrier is also a control
            // barrier, so a control barrier right after a memory barrier
            // would be redundant.
            Op::MemoryBarrier => self.emit_barrier(Id::NONE, Id(ops[0]), Id(ops[1]))?,
            Op::ControlBarrier => {
                if self.previous_instruction_opcode != Some(Op::MemoryBarrier) {
                    self.emit_barrier(Id(ops[0]), Id(ops[1]), Id(ops[2]))?;
                }
            }

            Op::VectorTimesMatrix | Op::MatrixTimesVector => {
                // If the matrix needs a transpose and is square, flipping
                // the multiply order is equivalent and cheaper.
                let mtx = Id(ops[if inst.op == Op::MatrixTimesVector { 2 } else { 3 }]);
                let flip = match self.module.try_expression(mtx) {
                    Some(e) if e.need_transpose => {
                        let ty = self.module.ty(e.expression_type);
                        let ty = self.module.ty(ty.self_id);
                        ty.columns == ty.vecsize
                    }
                    _ => false,
                };
                if flip {
                    self.module.expression_mut(mtx).need_transpose = false;
                    glsl::emit_binary_op(self, Id(ops[0]), Id(ops[1]), Id(ops[3]), Id(ops[2]), "*")?;
                    self.module.expression_mut(mtx).need_transpose = true;
                } else {
                    self.binop(ops, "*")?
                }
            }

            _ => glsl::base_emit_instruction(self, inst)?,
        }

        self.previous_instruction_opcode = Some(inst.op);
        Ok(())
    }

    /// MSL-specific mappings of the GLSL.std.450 extended set.
    fn emit_glsl_op(&mut self, result_type: Id, id: Id, op: u32, args: &[u32]) -> Result<(), Error> {
        use spirv::GLOp;
        let a = |i: usize| Id(args[i]);
        match GLOp::from_u32(op) {
            Some(GLOp::Atan2) => {
                glsl::emit_binary_func_op(self, result_type, id, a(0), a(1), "atan2")
            }
            Some(GLOp::InverseSqrt) => glsl::emit_unary_func_op(self, result_type, id, a(0), "rsqrt"),
            Some(GLOp::RoundEven) => glsl::emit_unary_func_op(self, result_type, id, a(0), "rint"),
            Some(GLOp::FindSMsb) => glsl::emit_unary_func_op(self, result_type, id, a(0), "findSMSB"),
            Some(GLOp::FindUMsb) => glsl::emit_unary_func_op(self, result_type, id, a(0), "findUMSB"),
            Some(GLOp::PackSnorm4x8) => {
                glsl::emit_unary_func_op(self, result_type, id, a(0), "pack_float_to_snorm4x8")
            }
            Some(GLOp::PackUnorm4x8) => {
                glsl::emit_unary_func_op(self, result_type, id, a(0), "pack_float_to_unorm4x8")
            }
            Some(GLOp::PackSnorm2x16) => {
                glsl::emit_unary_func_op(self, result_type, id, a(0), "pack_float_to_snorm2x16")
            }
            Some(GLOp::PackUnorm2x16) => {
                glsl::emit_unary_func_op(self, result_type, id, a(0), "pack_float_to_unorm2x16")
            }
            Some(GLOp::PackHalf2x16) => glsl::emit_unary_func_op(
                self,
                result_type,
                id,
                a(0),
                "unsupported_GLSLstd450PackHalf2x16",
            ),
            Some(GLOp::UnpackSnorm4x8) => {
                glsl::emit_unary_func_op(self, result_type, id, a(0), "unpack_snorm4x8_to_float")
            }
            Some(GLOp::UnpackUnorm4x8) => {
                glsl::emit_unary_func_op(self, result_type, id, a(0), "unpack_unorm4x8_to_float")
            }
            Some(GLOp::UnpackSnorm2x16) => {
                glsl::emit_unary_func_op(self, result_type, id, a(0), "unpack_snorm2x16_to_float")
            }
            Some(GLOp::UnpackUnorm2x16) => {
                glsl::emit_unary_func_op(self, result_type, id, a(0), "unpack_unorm2x16_to_float")
            }
            Some(GLOp::UnpackHalf2x16) => glsl::emit_unary_func_op(
                self,
                result_type,
                id,
                a(0),
                "unsupported_GLSLstd450UnpackHalf2x16",
            ),
            Some(GLOp::PackDouble2x32) => glsl::emit_unary_func_op(
                self,
                result_type,
                id,
                a(0),
                "unsupported_GLSLstd450PackDouble2x32",
            ),
            Some(GLOp::UnpackDouble2x32) => glsl::emit_unary_func_op(
                self,
                result_type,
                id,
                a(0),
                "unsupported_GLSLstd450UnpackDouble2x32",
            ),
            Some(GLOp::MatrixInverse) => {
                let fname = match self.module.ty(result_type).columns {
                    2 => "spvInverse2x2",
                    3 => "spvInverse3x3",
                    4 => "spvInverse4x4",
                    _ => return Err(Error::UnsupportedExtInst(op)),
                };
                glsl::emit_unary_func_op(self, result_type, id, a(0), fname)
            }
            _ => glsl::base_emit_glsl_op(self, result_type, id, op, args),
        }
    }

    /// The texture sampling function for an image operation.
    fn to_function_name(
        &mut self,
        img: Id,
        is_fetch: bool,
        is_gather: bool,
        has_dref: bool,
    ) -> Result<String, Error> {
        let mut fname = glsl::to_expression(self, img)?;
        fname.push('.');
        fname.push_str(if is_fetch {
            "read"
        } else if is_gather {
            "gather"
        } else {
            "sample"
        });
        if has_dref {
            fname.push_str("_compare");
        }
        Ok(fname)
    }

    /// The argument list for a texture sampling function.
    fn to_function_args(
        &mut self,
        img: Id,
        is_fetch: bool,
        _is_gather: bool,
        is_proj: bool,
        args: &TexArgs,
        forward: &mut bool,
    ) -> Result<String, Error> {
        let mut farg_str = String::new();
        if !is_fetch {
            farg_str.push_str(&self.to_sampler_expression(img));
        }

        let (dim, arrayed) = {
            let t = self.module.expression_type(img);
            let img_ty = self.module.ty(t.self_id);
            (img_ty.image.dim, img_ty.image.arrayed)
        };

        *forward = glsl::should_forward(self, args.coord);
        let coord_expr = glsl::to_enclosed_expression(self, args.coord)?;
        let coord_is_fp = {
            let t = self.module.expression_type(args.coord);
            self.module.ty(t.self_id).base.is_float()
        };
        let coord_size = {
            let t = self.module.expression_type(args.coord);
            self.module.ty(t.self_id).vecsize
        };

        let mut tex_coords = coord_expr.clone();
        let mut alt_coord = "";
        let mut is_cube_fetch = false;
        match dim {
            Dim::Dim1D => {
                if coord_size > 1 {
                    tex_coords.push_str(".x");
                }
                if is_fetch {
                    tex_coords =
                        format!("uint({})", Self::round_fp_tex_coords(tex_coords, coord_is_fp));
                }
                alt_coord = ".y";
            }
            Dim::DimBuffer => {
                if coord_size > 1 {
                    tex_coords.push_str(".x");
                }
                if is_fetch {
                    // Metal texel buffers are two-dimensional.
                    tex_coords = format!(
                        "uint2({}, 0)",
                        Self::round_fp_tex_coords(tex_coords, coord_is_fp)
                    );
                }
                alt_coord = ".y";
            }
            Dim::Dim2D => {
                if coord_size > 2 {
                    tex_coords.push_str(".xy");
                }
                if is_fetch {
                    tex_coords =
                        format!("uint2({})", Self::round_fp_tex_coords(tex_coords, coord_is_fp));
                }
                alt_coord = ".z";
            }
            Dim::Dim3D => {
                if coord_size > 3 {
                    tex_coords.push_str(".xyz");
                }
                if is_fetch {
                    tex_coords =
                        format!("uint3({})", Self::round_fp_tex_coords(tex_coords, coord_is_fp));
                }
                alt_coord = ".w";
            }
            Dim::DimCube => {
                if is_fetch {
                    is_cube_fetch = true;
                    tex_coords.push_str(".xy");
                    tex_coords =
                        format!("uint2({})", Self::round_fp_tex_coords(tex_coords, coord_is_fp));
                } else if coord_size > 3 {
                    tex_coords.push_str(".xyz");
                }
                alt_coord = ".w";
            }
            _ => {}
        }

        // Projective sampling divides by the alternate coordinate.
        if is_proj {
            tex_coords.push_str(&format!(" / {coord_expr}{alt_coord}"));
        }

        if !farg_str.is_empty() {
            farg_str.push_str(", ");
        }
        farg_str.push_str(&tex_coords);

        // Cube fetches address the face explicitly.
        if is_cube_fetch {
            farg_str.push_str(&format!(
                ", uint({})",
                Self::round_fp_tex_coords(format!("{coord_expr}.z"), coord_is_fp)
            ));
        }

        if arrayed {
            farg_str.push_str(&format!(
                ", uint({})",
                Self::round_fp_tex_coords(format!("{coord_expr}{alt_coord}"), coord_is_fp)
            ));
        }

        if args.dref.is_some() {
            *forward = *forward && glsl::should_forward(self, args.dref);
            let dref = glsl::to_expression(self, args.dref)?;
            farg_str.push_str(&format!(", {dref}"));
        }

        if args.bias.is_some() {
            *forward = *forward && glsl::should_forward(self, args.bias);
            let bias = glsl::to_expression(self, args.bias)?;
            farg_str.push_str(&format!(", bias({bias})"));
        }

        if args.lod.is_some() {
            *forward = *forward && glsl::should_forward(self, args.lod);
            let lod = glsl::to_expression(self, args.lod)?;
            if is_fetch {
                farg_str.push_str(&format!(", {lod}"));
            } else {
                farg_str.push_str(&format!(", level({lod})"));
            }
        }

        if args.grad_x.is_some() || args.grad_y.is_some() {
            *forward = *forward && glsl::should_forward(self, args.grad_x);
            *forward = *forward && glsl::should_forward(self, args.grad_y);
            let grad_opt = match dim {
                Dim::Dim2D => "2d",
                Dim::Dim3D => "3d",
                Dim::DimCube => "cube",
                _ => "unsupported_gradient_dimension",
            };
            let grad_x = glsl::to_expression(self, args.grad_x)?;
            let grad_y = glsl::to_expression(self, args.grad_y)?;
            farg_str.push_str(&format!(", gradient{grad_opt}({grad_x}, {grad_y})"));
        }

        let offset_id = if args.const_offset.is_some() {
            args.const_offset
        } else {
            args.offset
        };
        if offset_id.is_some() {
            *forward = *forward && glsl::should_forward(self, offset_id);
            let mut offset_expr = glsl::to_expression(self, offset_id)?;
            match dim {
                Dim::Dim2D => {
                    let size = {
                        let t = self.module.expression_type(offset_id);
                        self.module.ty(t.self_id).vecsize
                    };
                    if size > 2 {
                        offset_expr.push_str(".xy");
                    }
                    farg_str.push_str(&format!(", {offset_expr}"));
                }
                Dim::Dim3D => {
                    let size = {
                        let t = self.module.expression_type(offset_id);
                        self.module.ty(t.self_id).vecsize
                    };
                    if size > 3 {
                        offset_expr.push_str(".xyz");
                    }
                    farg_str.push_str(&format!(", {offset_expr}"));
                }
                _ => {}
            }
        }

        if args.component.is_some() {
            *forward = *forward && glsl::should_forward(self, args.component);
            let component = self.to_component_argument(args.component)?;
            farg_str.push_str(&format!(", {component}"));
        }

        if args.sample.is_some() {
            let sample = glsl::to_expression(self, args.sample)?;
            farg_str.push_str(&format!(", {sample}"));
        }

        Ok(farg_str)
    }

    fn type_to_glsl(&self, ty: &Type, id: Id) -> String {
        // The pointer-ness of a type never prints in MSL; address spaces
        // are attached at declaration sites instead.
        let mut type_name = match ty.base {
            BaseType::Struct => return glsl::base_to_name(self, ty.self_id),
            BaseType::Image | BaseType::SampledImage => return self.image_type_glsl(ty, id),
            BaseType::Sampler => return "sampler".to_string(),
            BaseType::Void => return "void".to_string(),
            BaseType::AtomicCounter => return "atomic_uint".to_string(),
            BaseType::Bool => "bool".to_string(),
            BaseType::Char => "char".to_string(),
            BaseType::Int => if ty.width == 16 { "short" } else { "int" }.to_string(),
            BaseType::UInt => if ty.width == 16 { "ushort" } else { "uint" }.to_string(),
            BaseType::Int64 => "long".to_string(),
            BaseType::UInt64 => "size_t".to_string(),
            BaseType::Float => if ty.width == 16 { "half" } else { "float" }.to_string(),
            BaseType::Double => "double".to_string(),
        };
        if ty.columns > 1 {
            type_name.push_str(&format!("{}x", ty.columns));
        }
        if ty.vecsize > 1 {
            type_name.push_str(&format!("{}", ty.vecsize));
        }
        type_name
    }

    fn bitcast_op(&self, out_ty: &Type, in_ty: &Type) -> Option<String> {
        let integer_swap = (out_ty.base.is_unsigned_int() && in_ty.base.is_signed_int())
            || (out_ty.base.is_signed_int() && in_ty.base.is_unsigned_int());
        if integer_swap {
            return Some(self.type_to_glsl(out_ty, Id::NONE));
        }
        let reinterpret = (out_ty.base.is_float() && !in_ty.base.is_float())
            || (!out_ty.base.is_float() && in_ty.base.is_float());
        if reinterpret {
            return Some(format!("as_type<{}>", self.type_to_glsl(out_ty, Id::NONE)));
        }
        None
    }

    /// Output builtins referenced from the entry function are qualified
    /// with the output struct's name.
    fn builtin_to_name(&self, builtin: BuiltIn, storage: StorageClass) -> String {
        let base = glsl::base_builtin_to_name(builtin, storage);
        match builtin {
            BuiltIn::Position
            | BuiltIn::PointSize
            | BuiltIn::ClipDistance
            | BuiltIn::CullDistance
            | BuiltIn::Layer
            | BuiltIn::FragDepth => {
                let in_entry = self.state.current_function.is_some()
                    && self.state.current_function == self.module.entry_point.function;
                if in_entry && self.stage_out_var_id.is_some() {
                    format!("{STAGE_OUT_VAR_NAME}.{base}")
                } else {
                    base
                }
            }
            _ => base,
        }
    }

    fn builtin_qualifier(&self, builtin: BuiltIn) -> Result<&'static str, Error> {
        let flags = self.module.entry_point.flags;
        Ok(match builtin {
            // Vertex function in
            BuiltIn::VertexId | BuiltIn::VertexIndex => "vertex_id",
            BuiltIn::InstanceId | BuiltIn::InstanceIndex => "instance_id",
            // Vertex function out
            BuiltIn::ClipDistance => "clip_distance",
            BuiltIn::PointSize => "point_size",
            BuiltIn::Position => "position",
            BuiltIn::Layer => "render_target_array_index",
            // Fragment function in
            BuiltIn::FrontFacing => "front_facing",
            BuiltIn::PointCoord => "point_coord",
            BuiltIn::FragCoord => "position",
            BuiltIn::SampleId => "sample_id",
            BuiltIn::SampleMask => "sample_mask",
            // Fragment function out
            BuiltIn::FragDepth => {
                if flags.contains(ExecutionModeFlags::DEPTH_GREATER) {
                    "depth(greater)"
                } else if flags.contains(ExecutionModeFlags::DEPTH_LESS) {
                    "depth(less)"
                } else {
                    "depth(any)"
                }
            }
            // Compute function in
            BuiltIn::GlobalInvocationId => "thread_position_in_grid",
            BuiltIn::WorkgroupId => "threadgroup_position_in_grid",
            BuiltIn::NumWorkgroups => "threadgroups_per_grid",
            BuiltIn::LocalInvocationId => "thread_position_in_threadgroup",
            BuiltIn::LocalInvocationIndex => "thread_index_in_threadgroup",
            other => return Err(Error::UnsupportedBuiltIn(other)),
        })
    }

    /// Address-space qualifiers are required for all pointer and reference
    /// arguments in MSL.
    fn argument_address_space(&self, var_id: Id) -> &'static str {
        let var = self.module.variable(var_id);
        let ty = self.module.ty(var.basetype);
        if ty.base == BaseType::Struct {
            match ty.storage {
                Some(StorageClass::StorageBuffer) => return "device",
                Some(
                    StorageClass::Uniform
                    | StorageClass::UniformConstant
                    | StorageClass::PushConstant,
                ) => {
                    let writable = self
                        .module
                        .has_decoration(ty.self_id, DecorationFlags::BUFFER_BLOCK)
                        && !self
                            .module
                            .has_decoration(var_id, DecorationFlags::NON_WRITABLE);
                    return if writable { "device" } else { "constant" };
                }
                _ => {}
            }
        }
        "thread"
    }

    /// Per (execution model, storage, builtin) attribute qualifiers of an
    /// interface struct member.
    fn member_attribute_qualifier(&self, ty: &Type, member: u32) -> Result<String, Error> {
        let model = self.module.entry_point.model;
        let storage = ty.storage;
        let dec = self.module.member_decoration(ty.self_id, member);
        let (is_builtin, builtin) = match dec {
            Some(dec) => (
                dec.flags.contains(DecorationFlags::BUILTIN),
                dec.builtin,
            ),
            None => (false, None),
        };

        // Vertex function inputs.
        if model == ExecutionModel::Vertex && storage == Some(StorageClass::Input) {
            if is_builtin {
                return Ok(match builtin {
                    Some(
                        b @ (BuiltIn::VertexId
                        | BuiltIn::VertexIndex
                        | BuiltIn::InstanceId
                        | BuiltIn::InstanceIndex),
                    ) => {
                        format!(" [[{}]]", self.builtin_qualifier(b)?)
                    }
                    _ => String::new(),
                });
            }
            let location = self.ordered_member_location(ty.self_id, member);
            if location != UNKNOWN_LOCATION {
                return Ok(format!(" [[attribute({location})]]"));
            }
        }

        // Vertex function outputs.
        if model == ExecutionModel::Vertex && storage == Some(StorageClass::Output) {
            if is_builtin {
                return Ok(match builtin {
                    Some(BuiltIn::PointSize) => {
                        // Metal rejects the point-size attribute on
                        // non-point topologies.
                        if self.options.enable_point_size_builtin {
                            format!(" [[{}]]", self.builtin_qualifier(BuiltIn::PointSize)?)
                        } else {
                            String::new()
                        }
                    }
                    Some(b @ (BuiltIn::Position | BuiltIn::Layer | BuiltIn::ClipDistance)) => {
                        format!(" [[{}]]", self.builtin_qualifier(b)?)
                    }
                    _ => String::new(),
                });
            }
            let location = self.ordered_member_location(ty.self_id, member);
            if location != UNKNOWN_LOCATION {
                return Ok(format!(" [[user(locn{location})]]"));
            }
        }

        // Fragment function inputs.
        if model == ExecutionModel::Fragment && storage == Some(StorageClass::Input) {
            if is_builtin {
                return Ok(match builtin {
                    Some(
                        b @ (BuiltIn::FrontFacing
                        | BuiltIn::PointCoord
                        | BuiltIn::FragCoord
                        | BuiltIn::SampleId
                        | BuiltIn::SampleMask
                        | BuiltIn::Layer),
                    ) => format!(" [[{}]]", self.builtin_qualifier(b)?),
                    _ => String::new(),
                });
            }
            let location = self.ordered_member_location(ty.self_id, member);
            if location != UNKNOWN_LOCATION {
                return Ok(format!(" [[user(locn{location})]]"));
            }
        }

        // Fragment function outputs.
        if model == ExecutionModel::Fragment && storage == Some(StorageClass::Output) {
            if is_builtin {
                return Ok(match builtin {
                    Some(b @ (BuiltIn::SampleMask | BuiltIn::FragDepth)) => {
                        format!(" [[{}]]", self.builtin_qualifier(b)?)
                    }
                    _ => String::new(),
                });
            }
            let location = self.ordered_member_location(ty.self_id, member);
            if location != UNKNOWN_LOCATION {
                return Ok(format!(" [[color({location})]]"));
            }
        }

        // Compute function inputs.
        if model == ExecutionModel::GLCompute && storage == Some(StorageClass::Input) {
            if is_builtin {
                return Ok(match builtin {
                    Some(
                        b @ (BuiltIn::GlobalInvocationId
                        | BuiltIn::WorkgroupId
                        | BuiltIn::NumWorkgroups
                        | BuiltIn::LocalInvocationId
                        | BuiltIn::LocalInvocationIndex),
                    ) => format!(" [[{}]]", self.builtin_qualifier(b)?),
                    _ => String::new(),
                });
            }
        }

        Ok(String::new())
    }

    /// The declaration signature of a function. For the entry point this
    /// includes the Metal entry kind, return struct and resource
    /// arguments.
    fn emit_function_prototype(&mut self, func_id: Id) -> Result<(), Error> {
        let func = self.module.function(func_id).clone();
        let return_ty = self.module.ty(func.return_type).clone();

        let mut decl = self.func_type_decl(&return_ty);
        decl.push(' ');
        decl.push_str(&glsl::base_to_name(self, func_id));
        decl.push('(');

        if self.state.processing_entry_point {
            decl.push_str(&self.entry_point_args(!func.parameters.is_empty())?);

            // The output block's initializer expression is re-created here
            // because expressions are cleared after each pass.
            if self.stage_out_var_id.is_some() {
                let so_var = self.module.variable(self.stage_out_var_id).clone();
                self.module.set_expression(
                    so_var.initializer,
                    Expression {
                        text: "{}".to_string(),
                        expression_type: so_var.basetype,
                        immutable: true,
                        need_transpose: false,
                        packed: false,
                        base_variable: Id::NONE,
                    },
                );
            }
        }

        for (index, param) in func.parameters.iter().enumerate() {
            let address_space = match self.module.try_variable(param.id) {
                Some(_) => self.argument_address_space(param.id),
                None => "thread",
            };
            decl.push_str(address_space);
            decl.push(' ');
            decl.push_str(&self.argument_decl(param));

            // Manufacture an automatic sampler argument for sampled-image
            // parameters.
            let param_value_ty = {
                let t = self.module.ty(param.ty);
                self.module.ty(t.self_id)
            };
            if param_value_ty.base == BaseType::SampledImage
                && param_value_ty.image.dim != Dim::DimBuffer
            {
                let sampler = self.to_sampler_expression(param.id);
                decl.push_str(&format!(", thread const sampler& {sampler}"));
            }

            if index + 1 < func.parameters.len() {
                decl.push_str(", ");
            }
        }

        decl.push(')');
        glsl::statement(self, decl);
        Ok(())
    }

    /// Inside the entry function, objects with a qualified alias resolve
    /// to their interface-struct path.
    fn to_name(&self, id: Id) -> String {
        if self.state.current_function.is_some()
            && self.state.current_function == self.module.entry_point.function
        {
            let qualified = &self.module.meta(id).decoration.qualified_alias;
            if !qualified.is_empty() {
                return qualified.clone();
            }
        }
        glsl::base_to_name(self, id)
    }

    /// Manufacture the automatic sampler argument for sampled-image call
    /// arguments.
    fn to_func_call_arg(&mut self, id: Id) -> Result<String, Error> {
        let mut arg = glsl::to_expression(self, id)?;
        if let Some(var) = self.module.try_variable(id) {
            let ty = self.module.ty(var.basetype);
            let ty = self.module.ty(ty.self_id);
            if ty.base == BaseType::SampledImage && ty.image.dim != Dim::DimBuffer {
                arg.push_str(", ");
                arg.push_str(&self.to_sampler_expression(id));
            }
        }
        Ok(arg)
    }

    fn convert_row_major_matrix(&mut self, expr: String, ty: &Type) -> Result<String, Error> {
        if ty.columns == ty.vecsize {
            Ok(format!("transpose({expr})"))
        } else {
            Ok(format!(
                "spvConvertFromRowMajor{}x{}({expr})",
                ty.columns, ty.vecsize
            ))
        }
    }

    fn prepare_row_major_conversion(&mut self, columns: u32, vecsize: u32) -> Result<(), Error> {
        if columns == vecsize {
            // Square matrices just use transpose().
            return Ok(());
        }
        match CustomFunction::row_major_conversion(columns, vecsize) {
            Some(function) => {
                if !self.custom_functions.contains(&function) {
                    self.add_custom_function(function);
                    // The helpers print before the point of discovery.
                    self.state.force_recompile = true;
                }
                Ok(())
            }
            None => Err(Error::UnsupportedRowMajorConversion(columns, vecsize)),
        }
    }

    /// Packed members read back through a constructor of the unpacked
    /// type.
    fn unpack_expression(&self, expr: String, ty: &Type) -> String {
        format!("{}({expr})", self.type_to_glsl(ty, Id::NONE))
    }

    fn variable_qualifiers(&self, var_id: Id) -> &'static str {
        let ty = self.module.expression_type(var_id);
        if ty.storage == Some(StorageClass::Workgroup) {
            "threadgroup "
        } else {
            ""
        }
    }

    /// Adjust clip space at the end of the vertex entry function.
    fn emit_fixup(&mut self) -> Result<(), Error> {
        if self.module.entry_point.model != ExecutionModel::Vertex
            || self.stage_out_var_id.is_none()
            || self.qual_pos_var_name.is_empty()
        {
            return Ok(());
        }
        let pos = self.qual_pos_var_name.clone();
        if self.options.vertex.fixup_clipspace {
            glsl::statement(
                self,
                format!("{pos}.z = ({pos}.z + {pos}.w) * 0.5;       // Adjust clip-space for Metal"),
            );
        }
        if self.options.vertex.flip_vert_y {
            glsl::statement(self, format!("{pos}.y = -({pos}.y);    // Invert Y-axis for Metal"));
        }
        Ok(())
    }
}
