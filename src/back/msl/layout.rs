//! MSL layout rules: declared sizes and alignments, the pack-then-pad
//! struct aligner, and the interface-member sorter.

use super::Error;
use crate::{ArraySize, BaseType, DecorationFlags, FastHashMap, Id, Module, Type};

/// Padding bytes to print before a member, keyed by `(struct type, member)`.
pub(super) type PaddingMap = FastHashMap<(Id, u32), u32>;

/// Which key orders the members of an interface struct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SortAspect {
    Location,
    /// Metal handles vertex inputs better when sorted in reverse.
    LocationReverse,
    Offset,
    OffsetThenLocationReverse,
    Alphabetical,
}

/// Sort the members of `type_id` by builtin status (builtins last), then by
/// the requested aspect, permuting the member-type list and the member
/// decorations in lock-step.
pub(super) fn sort_members(module: &mut Module, type_id: Id, aspect: SortAspect) {
    let member_count = module.ty(type_id).members.len();
    // Make sure enough decoration records exist to permute.
    if member_count > 0 {
        module.member_decoration_mut(type_id, member_count as u32 - 1);
    }

    let decorations = module.meta(type_id).members.clone();
    let mut order: Vec<usize> = (0..member_count).collect();
    order.sort_by(|&a, &b| {
        let da = &decorations[a];
        let db = &decorations[b];
        let builtin_a = da.flags.contains(DecorationFlags::BUILTIN);
        let builtin_b = db.flags.contains(DecorationFlags::BUILTIN);
        builtin_a.cmp(&builtin_b).then_with(|| match aspect {
            SortAspect::Location => da.location.cmp(&db.location),
            SortAspect::LocationReverse => db.location.cmp(&da.location),
            SortAspect::Offset => da.offset.cmp(&db.offset),
            SortAspect::OffsetThenLocationReverse => da
                .offset
                .cmp(&db.offset)
                .then(db.location.cmp(&da.location)),
            SortAspect::Alphabetical => da.alias.cmp(&db.alias),
        })
    });

    let member_types = module.ty(type_id).members.clone();
    let sorted_types: Vec<Id> = order.iter().map(|&i| member_types[i]).collect();
    let sorted_decorations: Vec<crate::Decoration> =
        order.iter().map(|&i| decorations[i].clone()).collect();
    module.ty_mut(type_id).members = sorted_types;
    module.meta_mut(type_id).members = sorted_decorations;
}

fn array_len(module: &Module, ty: &Type) -> u32 {
    let len = match ty.array.last() {
        Some(&ArraySize::Literal(n)) => n,
        Some(&ArraySize::Constant(id)) => match module.try_constant(id) {
            Some(c) => c.scalar(),
            None => 1,
        },
        None => 1,
    };
    // Runtime arrays have zero length; their stride still occupies one
    // element for layout purposes.
    len.max(1)
}

/// The byte size a struct declares under MSL rules: the furthest extent of
/// any member from its SPIR-V offset.
pub(super) fn declared_struct_size(module: &Module, ty: &Type) -> Result<u32, Error> {
    let mut size = 0;
    for index in 0..ty.members.len() as u32 {
        let offset = match module.member_decoration(ty.self_id, index) {
            Some(dec) => dec.offset,
            None => 0,
        };
        size = size.max(offset + declared_struct_member_size(module, ty, index)?);
    }
    Ok(size)
}

/// The byte size of one struct member.
pub(super) fn declared_struct_member_size(
    module: &Module,
    struct_ty: &Type,
    index: u32,
) -> Result<u32, Error> {
    let member_type_id = struct_ty.members[index as usize];
    let ty = module.ty(member_type_id);
    let flags = match module.member_decoration(struct_ty.self_id, index) {
        Some(dec) => dec.flags,
        None => DecorationFlags::empty(),
    };

    if ty.is_opaque() || ty.base == BaseType::Void {
        return Err(Error::OpaqueLayoutQuery);
    }

    if ty.is_array() {
        let stride = module.meta(member_type_id).decoration.array_stride;
        return Ok(stride * array_len(module, ty));
    }

    if ty.base == BaseType::Struct {
        return declared_struct_size(module, module.ty(ty.self_id));
    }

    let component_size = ty.width / 8;
    let mut vecsize = ty.vecsize;
    let mut columns = ty.columns;
    if columns == 1 {
        // An unpacked 3-element vector is the same size as a 4-element one.
        if !flags.contains(DecorationFlags::C_PACKED) && vecsize == 3 {
            vecsize = 4;
        }
    } else if flags.contains(DecorationFlags::COL_MAJOR) {
        if vecsize == 3 {
            vecsize = 4;
        }
    } else if flags.contains(DecorationFlags::ROW_MAJOR) && columns == 3 {
        columns = 4;
    }
    Ok(vecsize * columns * component_size)
}

/// The byte alignment of one struct member.
pub(super) fn declared_struct_member_alignment(
    module: &Module,
    struct_ty: &Type,
    index: u32,
) -> Result<u32, Error> {
    let member_type_id = struct_ty.members[index as usize];
    let ty = module.ty(member_type_id);

    if ty.is_opaque() || ty.base == BaseType::Void {
        return Err(Error::OpaqueLayoutQuery);
    }
    if ty.base == BaseType::Struct {
        // Match the Vulkan std140 rule the offsets were computed under.
        return Ok(16);
    }

    if module.has_member_decoration(struct_ty.self_id, index, DecorationFlags::C_PACKED) {
        return Ok(ty.width / 8);
    }
    let size = declared_struct_member_size(module, struct_ty, index)?;
    Ok(size / (ty.columns * array_len(module, ty)))
}

/// Whether a member admits a `packed_` representation smaller than its
/// natural layout. Currently: any 3-element non-matrix vector.
pub(super) fn is_member_packable(module: &Module, struct_ty: &Type, index: u32) -> bool {
    let ty = module.ty(struct_ty.members[index as usize]);
    ty.vecsize == 3 && ty.columns == 1 && ty.array.is_empty()
}

/// Reconcile a `C_PACKED` struct's MSL layout with its SPIR-V offsets.
///
/// Members are walked twice: packing first, then padding, because packing a
/// member shrinks both its size and its alignment, which can in turn
/// require padding ahead of it.
pub(super) fn align_struct(
    module: &mut Module,
    type_id: Id,
    padding: &mut PaddingMap,
) -> Result<(), Error> {
    sort_members(module, type_id, SortAspect::Offset);

    let member_count = module.ty(type_id).members.len() as u32;

    // Pass 1: whenever a member's declared offset is closer than natural
    // alignment allows, the previous member must occupy less space than
    // natural; pack it if it can be packed.
    let mut cursor = 0;
    for index in 0..member_count {
        let ty = module.ty(type_id).clone();
        let align_mask = declared_struct_member_alignment(module, &ty, index)? - 1;
        cursor = (cursor + align_mask) & !align_mask;

        let declared_offset = module
            .member_decoration(type_id, index)
            .map_or(0, |dec| dec.offset);
        if cursor > declared_offset && index > 0 {
            let prev = index - 1;
            if is_member_packable(module, &ty, prev) {
                module.member_decoration_mut(type_id, prev).flags |= DecorationFlags::C_PACKED;
            }
        }
        cursor = declared_offset + declared_struct_member_size(module, &ty, index)?;
    }

    // Pass 2: pad wherever a member sits farther than its (possibly now
    // packed) alignment places it.
    let mut cursor = 0;
    for index in 0..member_count {
        let ty = module.ty(type_id).clone();
        let align_mask = declared_struct_member_alignment(module, &ty, index)? - 1;
        cursor = (cursor + align_mask) & !align_mask;

        let declared_offset = module
            .member_decoration(type_id, index)
            .map_or(0, |dec| dec.offset);
        if declared_offset > cursor {
            padding.insert((type_id, index), declared_offset - cursor);
        }
        cursor = declared_offset + declared_struct_member_size(module, &ty, index)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Constant, Decoration, ScalarValue};

    fn float_module() -> (Module, Id, Id) {
        let mut module = Module::with_bound(16);
        let ty_float = module.set_type(Id(1), Type::scalar(BaseType::Float, 32));
        let ty_vec3 = module.set_type(Id(2), Type::vector(BaseType::Float, 32, 3));
        (module, ty_float, ty_vec3)
    }

    fn decorate_member(module: &mut Module, ty: Id, index: u32, offset: u32) {
        *module.member_decoration_mut(ty, index) = Decoration {
            offset,
            flags: DecorationFlags::OFFSET,
            ..Decoration::default()
        };
    }

    #[test]
    fn vec3_followed_by_scalar_packs() {
        let (mut module, ty_float, ty_vec3) = float_module();
        let block = module.set_type(
            Id(3),
            Type {
                base: BaseType::Struct,
                members: vec![ty_vec3, ty_float],
                ..Type::default()
            },
        );
        decorate_member(&mut module, block, 0, 0);
        decorate_member(&mut module, block, 1, 12);

        let mut padding = PaddingMap::default();
        align_struct(&mut module, block, &mut padding).unwrap();

        assert!(module.has_member_decoration(block, 0, DecorationFlags::C_PACKED));
        assert!(padding.is_empty());
    }

    #[test]
    fn gap_between_members_pads() {
        let (mut module, ty_float, _) = float_module();
        let block = module.set_type(
            Id(3),
            Type {
                base: BaseType::Struct,
                members: vec![ty_float, ty_float],
                ..Type::default()
            },
        );
        decorate_member(&mut module, block, 0, 0);
        decorate_member(&mut module, block, 1, 8);

        let mut padding = PaddingMap::default();
        align_struct(&mut module, block, &mut padding).unwrap();

        assert_eq!(padding.get(&(block, 1)), Some(&4));
        assert!(!module.has_member_decoration(block, 0, DecorationFlags::C_PACKED));
    }

    #[test]
    fn array_member_size_uses_stride() {
        let (mut module, ty_float, _) = float_module();
        let len = module.set_constant(Id(4), Constant::new(ty_float, ScalarValue::Uint(3)));
        let ty_array = module.set_type(
            Id(5),
            Type {
                array: vec![ArraySize::Constant(len)],
                self_id: ty_float,
                ..Type::scalar(BaseType::Float, 32)
            },
        );
        module.meta_mut(ty_array).decoration.array_stride = 16;
        module.set_decoration(ty_array, DecorationFlags::ARRAY_STRIDE);
        let block = module.set_type(
            Id(6),
            Type {
                base: BaseType::Struct,
                members: vec![ty_array],
                ..Type::default()
            },
        );
        decorate_member(&mut module, block, 0, 0);

        let ty = module.ty(block).clone();
        assert_eq!(declared_struct_member_size(&module, &ty, 0).unwrap(), 48);
    }

    #[test]
    fn sorting_is_an_involution_for_distinct_locations() {
        let (mut module, ty_float, _) = float_module();
        let block = module.set_type(
            Id(3),
            Type {
                base: BaseType::Struct,
                members: vec![ty_float, ty_float, ty_float],
                ..Type::default()
            },
        );
        for (index, location) in [(0, 2u32), (1, 0), (2, 1)] {
            *module.member_decoration_mut(block, index) = Decoration {
                location,
                flags: DecorationFlags::LOCATION,
                alias: format!("member{location}"),
                ..Decoration::default()
            };
        }

        sort_members(&mut module, block, SortAspect::LocationReverse);
        let reversed: Vec<u32> = module.meta(block).members.iter().map(|d| d.location).collect();
        assert_eq!(reversed, [2, 1, 0]);

        sort_members(&mut module, block, SortAspect::Location);
        let ascending: Vec<u32> = module.meta(block).members.iter().map(|d| d.location).collect();
        assert_eq!(ascending, [0, 1, 2]);
    }

    #[test]
    fn builtins_sort_after_user_members() {
        let (mut module, ty_float, _) = float_module();
        let block = module.set_type(
            Id(3),
            Type {
                base: BaseType::Struct,
                members: vec![ty_float, ty_float],
                ..Type::default()
            },
        );
        *module.member_decoration_mut(block, 0) = Decoration {
            flags: DecorationFlags::BUILTIN,
            builtin: Some(spirv::BuiltIn::Position),
            ..Decoration::default()
        };
        *module.member_decoration_mut(block, 1) = Decoration {
            location: 0,
            flags: DecorationFlags::LOCATION,
            ..Decoration::default()
        };

        sort_members(&mut module, block, SortAspect::Location);
        assert!(module.has_member_decoration(block, 1, DecorationFlags::BUILTIN));
    }
}
