/*!
Backend for [MSL][msl] (Metal Shading Language).

## Binding model

Metal's bindings are flat per resource class. Since there isn't an obvious
mapping from SPIR-V's descriptor sets, callers may supply
[`ResourceBinding`] records mapping `(stage, descriptor set, binding)`
triples to `buffer` / `texture` / `sampler` indices; resources without a
matching record consume a per-class counter in declaration order.

## Entry points

Even though MSL entry points accept arguments and return values, the
restrictions differ from the Vulkan model: varyings must arrive in a single
`[[stage_in]]` struct, outputs leave through the return value, and nothing
may live at module scope. The writer gathers loose interface variables into
synthesized structs, moves `Private`/`Workgroup` globals into the entry
function, and threads every other module-scope variable through the call
graph as explicit parameters, so the body logic can pretend those
restrictions do not exist.

[msl]: https://developer.apple.com/metal/Metal-Shading-Language-Specification.pdf
*/

mod help;
mod keywords;
mod layout;
mod writer;

pub use writer::Writer;

use crate::arena::Id;
use std::fmt::Error as FmtError;

/// Descriptor set reserved for push constants.
pub const PUSH_CONSTANT_DESCRIPTOR_SET: u32 = !0;
/// Binding reserved for push constants.
pub const PUSH_CONSTANT_BINDING: u32 = 0;

/// Location marker for interface members that must not receive an
/// `attribute`/`user` qualifier.
pub(crate) const UNKNOWN_LOCATION: u32 = !0;

#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum Platform {
    Ios,
    #[default]
    MacOs,
}

/// Vertex-stage fix-ups inherited from the GLSL-family options.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct VertexOptions {
    /// Remap depth from the `[-w, w]` clip volume to Metal's `[0, w]`.
    pub fixup_clipspace: bool,
    /// Invert the Y axis of `gl_Position`.
    pub flip_vert_y: bool,
}

/// Configuration used by the [`Writer`].
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Options {
    /// (Major, Minor) target version of the Metal Shading Language.
    pub lang_version: (u8, u8),
    pub platform: Platform,
    /// Emit the `point_size` qualifier on a `PointSize` output builtin.
    ///
    /// Metal rejects the qualifier when the pipeline rasterizes non-point
    /// topologies, so callers building such pipelines turn this off.
    pub enable_point_size_builtin: bool,
    /// Demote specialization constants used as array lengths to ordinary
    /// constants; Metal has no dynamically sized stack arrays.
    pub resolve_specialized_array_lengths: bool,
    pub vertex: VertexOptions,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            lang_version: (1, 2),
            platform: Platform::MacOs,
            enable_point_size_builtin: true,
            resolve_specialized_array_lengths: true,
            vertex: VertexOptions::default(),
        }
    }
}

impl Options {
    pub const fn is_ios(&self) -> bool {
        matches!(self.platform, Platform::Ios)
    }

    pub const fn supports_msl_version(&self, major: u8, minor: u8) -> bool {
        self.lang_version.0 > major || (self.lang_version.0 == major && self.lang_version.1 >= minor)
    }
}

/// Mapping of one vertex attribute location to the Metal vertex buffer that
/// backs it.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct VertexAttribute {
    pub location: u32,
    pub msl_buffer: u32,
    pub msl_offset: u32,
    pub msl_stride: u32,
    pub per_instance: bool,
    /// Set by the compiler when the shader actually consumes the location.
    pub used_by_shader: bool,
}

/// Mapping of one Vulkan-style resource to flat Metal resource indices.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ResourceBinding {
    pub stage: spirv::ExecutionModel,
    pub desc_set: u32,
    pub binding: u32,
    pub msl_buffer: u32,
    pub msl_texture: u32,
    pub msl_sampler: u32,
    /// Set by the compiler when the shader actually uses the resource.
    pub used_by_shader: bool,
}

/// The automatic binding counters, one per Metal resource class.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ResourceIndices {
    pub buffer: u32,
    pub texture: u32,
    pub sampler: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FmtError),
    #[error("over three compilation passes without converging, this is a compiler bug")]
    CompilationLoop,
    #[error("the vertex function output structure may not include a matrix or array")]
    VertexOutputMatrixOrArray,
    #[error("the fragment function stage_in structure may not include a matrix or array")]
    FragmentInputMatrixOrArray,
    #[error("the fragment function output structure may not include a matrix or array")]
    FragmentOutputMatrixOrArray,
    #[error("opcode {0:?} is not supported")]
    UnsupportedOpcode(spirv::Op),
    #[error("extended instruction {0} of GLSL.std.450 is not supported")]
    UnsupportedExtInst(u32),
    #[error("builtin {0:?} is not supported")]
    UnsupportedBuiltIn(spirv::BuiltIn),
    #[error("{0} is used where a constant is required")]
    ExpectedConstant(Id),
    #[error("component index {0} is not one of 0, 1, 2 or 3")]
    InvalidComponentIndex(u32),
    #[error("control flow is not reducible to structured selections and loops")]
    UnstructuredControlFlow,
    #[error("invalid type for an image query")]
    InvalidImageQuery,
    #[error("illegal vector width for OpQuantizeToF16")]
    InvalidQuantizeWidth,
    #[error("querying the size or alignment of an opaque type")]
    OpaqueLayoutQuery,
    #[error("could not convert a {0}x{1} row-major matrix")]
    UnsupportedRowMajorConversion(u32, u32),
}

/// Shorthand result used internally by the backend.
pub(crate) type BackendResult = Result<(), Error>;

/// Translate `module` into MSL source.
///
/// `vertex_attributes` and `resource_bindings` are consulted for explicit
/// index assignments; their `used_by_shader` flags are updated to reflect
/// what the shader consumed.
pub fn write_string(
    module: crate::Module,
    options: &Options,
    vertex_attributes: &mut [VertexAttribute],
    resource_bindings: &mut [ResourceBinding],
) -> Result<String, Error> {
    Writer::new(module, options, vertex_attributes, resource_bindings).compile()
}
