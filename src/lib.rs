/*!
Smelter is a cross-compiler backend that translates parsed [SPIR-V][spv]
shader modules into [Metal Shading Language][msl] source.

The input is not a SPIR-V binary but the intermediate representation an
upstream parser produces from one: a flat pool of entities indexed by result
ID, plus a parallel table of decoration metadata. [`Module`] holds both. The
[`back::msl`] module turns a `Module` into MSL text.

## The ID pool

Every SPIR-V result ID owns one slot in the pool. A slot holds one
[`Entity`]: a type, variable, constant, function, basic block, emitted
expression, undefined value, or extended-instruction-set reference. Slots are
never freed; passes that need fresh IDs grow the pool monotonically through
[`Module::increase_bound_by`]. Cross-references between entities are plain
[`Id`]s, never owning pointers, so cyclic references (a pointer type naming a
struct that contains it) are unremarkable.

One parser convention matters throughout the backend: pointer and array
types are stored as clones of their pointee/element with [`Type::pointer`]
set (or a dimension appended to [`Type::array`]) and [`Type::self_id`]
naming the type they were cloned from. Emission code that needs the "real"
type behind such a clone follows `self_id`, transitively via
[`Module::canonical_type_id`].

[spv]: https://registry.khronos.org/SPIR-V/
[msl]: https://developer.apple.com/metal/Metal-Shading-Language-Specification.pdf
*/

mod arena;
pub mod back;

pub use arena::{Id, IdSet};

use bitflags::bitflags;

pub type FastHashMap<K, T> = rustc_hash::FxHashMap<K, T>;
pub type FastHashSet<K> = rustc_hash::FxHashSet<K>;

/// Base kind of an IR type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BaseType {
    #[default]
    Void,
    Bool,
    Char,
    Int,
    UInt,
    Int64,
    UInt64,
    Float,
    Double,
    Struct,
    Image,
    SampledImage,
    Sampler,
    AtomicCounter,
}

impl BaseType {
    /// Whether values of this kind are numeric scalars or aggregates of them.
    pub const fn is_numeric(self) -> bool {
        !matches!(
            self,
            Self::Void | Self::Image | Self::SampledImage | Self::Sampler | Self::AtomicCounter
        )
    }

    pub const fn is_signed_int(self) -> bool {
        matches!(self, Self::Int | Self::Int64 | Self::Char)
    }

    pub const fn is_unsigned_int(self) -> bool {
        matches!(self, Self::UInt | Self::UInt64)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }
}

/// The image sub-record of a [`Type`] with [`BaseType::Image`] or
/// [`BaseType::SampledImage`].
#[derive(Clone, Debug)]
pub struct ImageType {
    /// ID of the sampled (pixel) type.
    pub sampled_type: Id,
    pub dim: spirv::Dim,
    pub depth: bool,
    pub arrayed: bool,
    pub ms: bool,
    /// SPIR-V `Sampled` operand: 1 = sampled, 2 = storage.
    pub sampled: u32,
    /// Access qualifier, if the module supplied one. When absent, storage
    /// image access is inferred from `NON_READABLE`/`NON_WRITABLE`
    /// decorations on the backing variable.
    pub access: Option<spirv::AccessQualifier>,
}

impl Default for ImageType {
    fn default() -> Self {
        ImageType {
            sampled_type: Id::NONE,
            dim: spirv::Dim::Dim2D,
            depth: false,
            arrayed: false,
            ms: false,
            sampled: 1,
            access: None,
        }
    }
}

/// One dimension of an array type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArraySize {
    Literal(u32),
    /// Length given by a (possibly specialization) constant.
    Constant(Id),
}

/// An IR type.
#[derive(Clone, Debug, Default)]
pub struct Type {
    pub base: BaseType,
    /// Scalar bit width. Zero for non-numeric kinds.
    pub width: u32,
    /// Component count; 1 for scalars.
    pub vecsize: u32,
    /// Matrix column count; 1 for non-matrices.
    pub columns: u32,
    /// Array dimensions, innermost first. Empty for non-arrays.
    pub array: Vec<ArraySize>,
    pub pointer: bool,
    pub storage: Option<spirv::StorageClass>,
    /// Member type IDs, for structs.
    pub members: Vec<Id>,
    pub image: ImageType,
    /// The type this one was cloned from: the pointee for pointer types,
    /// the element for array types, itself otherwise. Always leads to the
    /// declarable type.
    pub self_id: Id,
}

impl Type {
    pub fn scalar(base: BaseType, width: u32) -> Self {
        Type {
            base,
            width,
            vecsize: 1,
            columns: 1,
            ..Type::default()
        }
    }

    pub fn vector(base: BaseType, width: u32, vecsize: u32) -> Self {
        Type {
            vecsize,
            ..Type::scalar(base, width)
        }
    }

    pub fn matrix(base: BaseType, width: u32, columns: u32, vecsize: u32) -> Self {
        Type {
            vecsize,
            columns,
            ..Type::scalar(base, width)
        }
    }

    pub const fn is_matrix(&self) -> bool {
        self.columns > 1
    }

    pub fn is_array(&self) -> bool {
        !self.array.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.vecsize == 1 && self.columns == 1 && self.array.is_empty() && self.members.is_empty()
    }

    /// Whether this type is an opaque handle rather than plain data.
    pub const fn is_opaque(&self) -> bool {
        matches!(
            self.base,
            BaseType::Image | BaseType::SampledImage | BaseType::Sampler | BaseType::AtomicCounter
        )
    }
}

/// A module-scope or function-scope variable.
#[derive(Clone, Debug)]
pub struct Variable {
    /// Type of the variable; conventionally a pointer type.
    pub basetype: Id,
    pub storage: spirv::StorageClass,
    /// Initializer ID, or [`Id::NONE`].
    pub initializer: Id,
    /// When this variable aliases another (e.g. a localized global threaded
    /// into a function), the ID of the original.
    pub basevariable: Id,
    /// Back-reference `(function, parameter index)` for variables that are
    /// function parameters, so a write observed during emission can clear
    /// the parameter's read-only status.
    pub parameter: Option<(Id, u32)>,
}

impl Variable {
    pub fn new(basetype: Id, storage: spirv::StorageClass) -> Self {
        Variable {
            basetype,
            storage,
            initializer: Id::NONE,
            basevariable: Id::NONE,
            parameter: None,
        }
    }
}

/// The value payload of a scalar [`Constant`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Sint(i64),
    Uint(u64),
    Float(f64),
}

#[derive(Clone, Debug)]
pub struct Constant {
    pub constant_type: Id,
    pub value: ScalarValue,
    /// Component or member constants, for composite constants.
    pub subconstants: Vec<Id>,
    /// Whether this is an `OpSpecConstant*`.
    pub specialization: bool,
    /// Set by the parser when the constant sizes an `OpTypeArray`.
    pub is_used_as_array_length: bool,
}

impl Constant {
    pub fn new(constant_type: Id, value: ScalarValue) -> Self {
        Constant {
            constant_type,
            value,
            subconstants: Vec::new(),
            specialization: false,
            is_used_as_array_length: false,
        }
    }

    /// The constant's value as a 32-bit unsigned scalar.
    pub fn scalar(&self) -> u32 {
        match self.value {
            ScalarValue::Bool(b) => b as u32,
            ScalarValue::Sint(v) => v as u32,
            ScalarValue::Uint(v) => v as u32,
            ScalarValue::Float(v) => v as u32,
        }
    }
}

/// One formal parameter of a [`Function`].
#[derive(Clone, Debug)]
pub struct Parameter {
    pub ty: Id,
    pub id: Id,
    pub read_count: u32,
    pub write_count: u32,
    /// True when the parameter was manufactured to thread a module-scope
    /// variable through the call chain.
    pub alias_global_variable: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Function {
    pub return_type: Id,
    pub parameters: Vec<Parameter>,
    /// IDs of `OpVariable`s with `Function` storage.
    pub local_variables: Vec<Id>,
    /// Basic blocks in layout order; the first is the entry block.
    pub blocks: Vec<Id>,
}

impl Function {
    pub fn add_local_variable(&mut self, id: Id) {
        self.local_variables.push(id);
    }

    pub fn add_parameter(&mut self, ty: Id, id: Id, alias_global_variable: bool) {
        self.parameters.push(Parameter {
            ty,
            id,
            read_count: 0,
            write_count: 0,
            alias_global_variable,
        });
    }
}

/// A non-terminator instruction, stored as its opcode plus raw operand
/// words laid out exactly as in the SPIR-V binary (result type and result
/// ID included, where the opcode has them).
#[derive(Clone, Debug)]
pub struct Instruction {
    pub op: spirv::Op,
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn new(op: spirv::Op, operands: Vec<u32>) -> Self {
        Instruction { op, operands }
    }

    pub fn id_operand(&self, index: usize) -> Id {
        Id(self.operands[index])
    }
}

/// How a basic block ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Terminator {
    /// Function return. `value` is [`Id::NONE`] for `void` returns, and may
    /// be rewritten by interface-block synthesis to name the output block.
    Return { value: Id },
    Branch { target: Id },
    BranchConditional {
        condition: Id,
        true_block: Id,
        false_block: Id,
    },
    Kill,
    Unreachable,
}

/// Structured-control-flow annotation of a block, mirroring
/// `OpSelectionMerge` / `OpLoopMerge`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Merge {
    #[default]
    None,
    Selection { merge: Id },
    Loop { merge: Id, continue_block: Id },
}

#[derive(Clone, Debug)]
pub struct Block {
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
    pub merge: Merge,
}

impl Block {
    pub fn new(terminator: Terminator) -> Self {
        Block {
            instructions: Vec::new(),
            terminator,
            merge: Merge::None,
        }
    }
}

/// A compiled expression: the MSL text an instruction's result turned into.
///
/// Expression slots are the only pool entries created during emission; the
/// driver loop clears them all before each retry pass.
#[derive(Clone, Debug)]
pub struct Expression {
    pub text: String,
    pub expression_type: Id,
    pub immutable: bool,
    /// The expression is a row-major matrix that still needs conversion to
    /// column-major form at its point of use.
    pub need_transpose: bool,
    /// The expression names a `packed_`-typed struct member whose value
    /// must be converted back to the unpacked type when read.
    pub packed: bool,
    /// The variable this expression was chained or loaded from, if any.
    pub base_variable: Id,
}

#[derive(Clone, Debug)]
pub struct Undef {
    pub basetype: Id,
}

/// An extended-instruction-set import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extension {
    GlslStd450,
}

/// One slot of the ID pool.
#[derive(Clone, Debug, Default)]
pub enum Entity {
    #[default]
    None,
    Type(Type),
    Variable(Variable),
    Constant(Constant),
    Function(Function),
    Block(Block),
    Expression(Expression),
    Undef(Undef),
    Extension(Extension),
}

bitflags! {
    /// Which decorations an ID (or struct member) carries. The value
    /// payloads live in the [`Decoration`] fields next to this set.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DecorationFlags: u32 {
        const BLOCK = 1 << 0;
        const BUFFER_BLOCK = 1 << 1;
        const ROW_MAJOR = 1 << 2;
        const COL_MAJOR = 1 << 3;
        const BUILTIN = 1 << 4;
        const LOCATION = 1 << 5;
        const OFFSET = 1 << 6;
        const BINDING = 1 << 7;
        const DESCRIPTOR_SET = 1 << 8;
        const NON_READABLE = 1 << 9;
        const NON_WRITABLE = 1 << 10;
        const SPEC_ID = 1 << 11;
        const ARRAY_STRIDE = 1 << 12;
        /// Backend-internal: the member uses a `packed_` MSL representation.
        const C_PACKED = 1 << 13;
    }
}

bitflags! {
    /// Execution modes of the entry point that the backend reacts to.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ExecutionModeFlags: u32 {
        const EARLY_FRAGMENT_TESTS = 1 << 0;
        const DEPTH_GREATER = 1 << 1;
        const DEPTH_LESS = 1 << 2;
    }
}

/// Decoration record for one ID or one struct member.
#[derive(Clone, Debug, Default)]
pub struct Decoration {
    /// Source-level name (`OpName` / `OpMemberName`), possibly rewritten by
    /// the illegal-name pass.
    pub alias: String,
    /// Full access path this ID resolves to after interface-block synthesis
    /// (e.g. `in.m_position`). Empty when the ID kept its own name.
    pub qualified_alias: String,
    pub flags: DecorationFlags,
    pub builtin: Option<spirv::BuiltIn>,
    pub location: u32,
    pub offset: u32,
    pub array_stride: u32,
    pub binding: u32,
    pub set: u32,
    pub spec_id: u32,
}

/// All metadata attached to one ID.
#[derive(Clone, Debug, Default)]
pub struct Meta {
    pub decoration: Decoration,
    /// Per-member decoration records, for struct types.
    pub members: Vec<Decoration>,
    /// Sampler bound to a sampled-image expression by `OpSampledImage`.
    pub sampler: Id,
}

/// The entry point the module was compiled for.
#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub name: String,
    pub model: spirv::ExecutionModel,
    /// ID of the entry function.
    pub function: Id,
    pub flags: ExecutionModeFlags,
    pub workgroup_size: [u32; 3],
}

impl Default for EntryPoint {
    fn default() -> Self {
        EntryPoint {
            name: String::new(),
            model: spirv::ExecutionModel::Vertex,
            function: Id::NONE,
            flags: ExecutionModeFlags::empty(),
            workgroup_size: [1; 3],
        }
    }
}

/// A parsed SPIR-V module: the ID pool, the parallel metadata table, and
/// the entry point description.
#[derive(Clone, Debug, Default)]
pub struct Module {
    entities: Vec<Entity>,
    meta: Vec<Meta>,
    pub entry_point: EntryPoint,
}

impl Module {
    /// Create a module whose pool can hold IDs below `bound`.
    pub fn with_bound(bound: u32) -> Self {
        let mut module = Module::default();
        module.entities.resize_with(bound as usize, Entity::default);
        module.meta.resize_with(bound as usize, Meta::default);
        module
    }

    /// The current ID upper bound; all live IDs are below it.
    pub fn bound(&self) -> u32 {
        self.entities.len() as u32
    }

    /// Grow the pool by `count` fresh IDs and return the first of them.
    pub fn increase_bound_by(&mut self, count: u32) -> Id {
        let first = self.bound();
        self.entities
            .resize_with((first + count) as usize, Entity::default);
        self.meta.resize_with((first + count) as usize, Meta::default);
        Id(first)
    }

    pub fn entity(&self, id: Id) -> &Entity {
        &self.entities[id.index()]
    }

    pub fn entity_mut(&mut self, id: Id) -> &mut Entity {
        &mut self.entities[id.index()]
    }

    /// Iterate over `(id, entity)` pairs of all live slots.
    pub fn iter(&self) -> impl Iterator<Item = (Id, &Entity)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(index, entity)| (Id(index as u32), entity))
    }

    pub fn set_type(&mut self, id: Id, mut ty: Type) -> Id {
        if ty.self_id.is_none() {
            ty.self_id = id;
        }
        self.entities[id.index()] = Entity::Type(ty);
        id
    }

    pub fn set_variable(&mut self, id: Id, var: Variable) -> Id {
        self.entities[id.index()] = Entity::Variable(var);
        id
    }

    pub fn set_constant(&mut self, id: Id, constant: Constant) -> Id {
        self.entities[id.index()] = Entity::Constant(constant);
        id
    }

    pub fn set_function(&mut self, id: Id, function: Function) -> Id {
        self.entities[id.index()] = Entity::Function(function);
        id
    }

    pub fn set_block(&mut self, id: Id, block: Block) -> Id {
        self.entities[id.index()] = Entity::Block(block);
        id
    }

    pub fn set_expression(&mut self, id: Id, expression: Expression) -> Id {
        self.entities[id.index()] = Entity::Expression(expression);
        id
    }

    pub fn set_undef(&mut self, id: Id, undef: Undef) -> Id {
        self.entities[id.index()] = Entity::Undef(undef);
        id
    }

    pub fn set_extension(&mut self, id: Id, ext: Extension) -> Id {
        self.entities[id.index()] = Entity::Extension(ext);
        id
    }

    /// Drop every [`Expression`] slot, restoring the pool to its
    /// pre-emission state.
    pub fn reset_expressions(&mut self) {
        for entity in self.entities.iter_mut() {
            if let Entity::Expression(_) = *entity {
                *entity = Entity::None;
            }
        }
    }

    pub fn ty(&self, id: Id) -> &Type {
        match self.entities[id.index()] {
            Entity::Type(ref ty) => ty,
            ref other => unreachable!("{id} is {other:?}, not a type"),
        }
    }

    pub fn ty_mut(&mut self, id: Id) -> &mut Type {
        match self.entities[id.index()] {
            Entity::Type(ref mut ty) => ty,
            ref other => unreachable!("{id} is {other:?}, not a type"),
        }
    }

    pub fn variable(&self, id: Id) -> &Variable {
        match self.entities[id.index()] {
            Entity::Variable(ref var) => var,
            ref other => unreachable!("{id} is {other:?}, not a variable"),
        }
    }

    pub fn variable_mut(&mut self, id: Id) -> &mut Variable {
        match self.entities[id.index()] {
            Entity::Variable(ref mut var) => var,
            ref other => unreachable!("{id} is {other:?}, not a variable"),
        }
    }

    pub fn try_variable(&self, id: Id) -> Option<&Variable> {
        match self.entities.get(id.index()) {
            Some(&Entity::Variable(ref var)) => Some(var),
            _ => None,
        }
    }

    pub fn constant(&self, id: Id) -> &Constant {
        match self.entities[id.index()] {
            Entity::Constant(ref c) => c,
            ref other => unreachable!("{id} is {other:?}, not a constant"),
        }
    }

    pub fn try_constant(&self, id: Id) -> Option<&Constant> {
        match self.entities.get(id.index()) {
            Some(&Entity::Constant(ref c)) => Some(c),
            _ => None,
        }
    }

    pub fn function(&self, id: Id) -> &Function {
        match self.entities[id.index()] {
            Entity::Function(ref f) => f,
            ref other => unreachable!("{id} is {other:?}, not a function"),
        }
    }

    pub fn function_mut(&mut self, id: Id) -> &mut Function {
        match self.entities[id.index()] {
            Entity::Function(ref mut f) => f,
            ref other => unreachable!("{id} is {other:?}, not a function"),
        }
    }

    pub fn block(&self, id: Id) -> &Block {
        match self.entities[id.index()] {
            Entity::Block(ref b) => b,
            ref other => unreachable!("{id} is {other:?}, not a block"),
        }
    }

    pub fn block_mut(&mut self, id: Id) -> &mut Block {
        match self.entities[id.index()] {
            Entity::Block(ref mut b) => b,
            ref other => unreachable!("{id} is {other:?}, not a block"),
        }
    }

    pub fn try_expression(&self, id: Id) -> Option<&Expression> {
        match self.entities.get(id.index()) {
            Some(&Entity::Expression(ref e)) => Some(e),
            _ => None,
        }
    }

    pub fn expression_mut(&mut self, id: Id) -> &mut Expression {
        match self.entities[id.index()] {
            Entity::Expression(ref mut e) => e,
            ref other => unreachable!("{id} is {other:?}, not an expression"),
        }
    }

    pub fn meta(&self, id: Id) -> &Meta {
        &self.meta[id.index()]
    }

    pub fn meta_mut(&mut self, id: Id) -> &mut Meta {
        &mut self.meta[id.index()]
    }

    /// Copy all metadata of `from` onto `to`; used when a freshly allocated
    /// ID aliases the semantics of an existing one.
    pub fn copy_meta(&mut self, from: Id, to: Id) {
        self.meta[to.index()] = self.meta[from.index()].clone();
    }

    pub fn name(&self, id: Id) -> &str {
        &self.meta[id.index()].decoration.alias
    }

    pub fn set_name(&mut self, id: Id, name: impl Into<String>) {
        self.meta[id.index()].decoration.alias = name.into();
    }

    pub fn member_decoration(&self, type_id: Id, index: u32) -> Option<&Decoration> {
        self.meta[type_id.index()].members.get(index as usize)
    }

    /// Per-member decoration record, materialized on demand.
    pub fn member_decoration_mut(&mut self, type_id: Id, index: u32) -> &mut Decoration {
        let members = &mut self.meta[type_id.index()].members;
        if members.len() <= index as usize {
            members.resize_with(index as usize + 1, Decoration::default);
        }
        &mut members[index as usize]
    }

    pub fn member_name(&self, type_id: Id, index: u32) -> &str {
        match self.member_decoration(type_id, index) {
            Some(dec) => &dec.alias,
            None => "",
        }
    }

    pub fn set_member_name(&mut self, type_id: Id, index: u32, name: impl Into<String>) {
        self.member_decoration_mut(type_id, index).alias = name.into();
    }

    pub fn has_decoration(&self, id: Id, flags: DecorationFlags) -> bool {
        self.meta[id.index()].decoration.flags.contains(flags)
    }

    pub fn set_decoration(&mut self, id: Id, flags: DecorationFlags) {
        self.meta[id.index()].decoration.flags |= flags;
    }

    pub fn unset_decoration(&mut self, id: Id, flags: DecorationFlags) {
        self.meta[id.index()].decoration.flags &= !flags;
    }

    pub fn has_member_decoration(&self, type_id: Id, index: u32, flags: DecorationFlags) -> bool {
        match self.member_decoration(type_id, index) {
            Some(dec) => dec.flags.contains(flags),
            None => false,
        }
    }

    /// Follow `self_id` chains (pointer and array clones) down to the
    /// canonical type ID that owns names and member decorations.
    pub fn canonical_type_id(&self, mut id: Id) -> Id {
        loop {
            let ty = self.ty(id);
            if ty.self_id == id || ty.self_id.is_none() {
                return id;
            }
            id = ty.self_id;
        }
    }

    /// The decoration flags of a struct member combined with those of the
    /// member's own type; both must be consulted when choosing address-space
    /// and layout qualifiers.
    pub fn combined_member_flags(&self, ty: &Type, index: u32) -> DecorationFlags {
        let canonical = self.canonical_type_id(ty.self_id);
        let mut flags = match self.member_decoration(canonical, index) {
            Some(dec) => dec.flags,
            None => DecorationFlags::empty(),
        };
        if let Some(&member_type) = ty.members.get(index as usize) {
            flags |= self.meta[member_type.index()].decoration.flags;
        }
        flags
    }

    /// The type ID an expression-like entity evaluates to. For variables
    /// this is the (pointer) variable type; callers bypass the pointer via
    /// [`Type::self_id`] when they need the value type.
    pub fn expression_type_id(&self, id: Id) -> Id {
        match self.entities[id.index()] {
            Entity::Variable(ref var) => var.basetype,
            Entity::Constant(ref c) => c.constant_type,
            Entity::Expression(ref e) => e.expression_type,
            Entity::Undef(ref u) => u.basetype,
            ref other => unreachable!("{id} is {other:?}, which has no type"),
        }
    }

    pub fn expression_type(&self, id: Id) -> &Type {
        self.ty(self.expression_type_id(id))
    }

    /// Follow expression and alias chains back to the variable that stores
    /// the value, if there is one.
    pub fn backing_variable(&self, mut id: Id) -> Option<&Variable> {
        loop {
            match self.entities.get(id.index())? {
                &Entity::Variable(ref var) => {
                    if var.basevariable.is_some() {
                        id = var.basevariable;
                        continue;
                    }
                    return Some(var);
                }
                &Entity::Expression(ref expr) if expr.base_variable.is_some() => {
                    id = expr.base_variable;
                }
                _ => return None,
            }
        }
    }

    /// Like [`Module::backing_variable`], but returns the variable's ID.
    pub fn backing_variable_id(&self, mut id: Id) -> Id {
        loop {
            match self.entities.get(id.index()) {
                Some(&Entity::Variable(ref var)) => {
                    if var.basevariable.is_some() {
                        id = var.basevariable;
                        continue;
                    }
                    return id;
                }
                Some(&Entity::Expression(ref expr)) if expr.base_variable.is_some() => {
                    id = expr.base_variable;
                }
                _ => return Id::NONE,
            }
        }
    }
}
