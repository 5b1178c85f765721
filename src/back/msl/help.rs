//! Helper functions injected into the generated MSL for SPIR-V and GLSL
//! idioms Metal lacks natively.

use super::writer::Writer;
use super::BackendResult;
use crate::back::glsl::{begin_scope, end_scope, statement};

/// One injectable MSL helper. The registry is an ordered set of these; it
/// only ever grows, so retry passes emit a superset of what the previous
/// pass emitted.
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub(super) enum CustomFunction {
    Mod,
    Radians,
    Degrees,
    FindILsb,
    FindUMsb,
    FindSMsb,
    ArrayCopy,
    Inverse2x2,
    Inverse3x3,
    Inverse4x4,
    RowMajor2x3,
    RowMajor2x4,
    RowMajor3x2,
    RowMajor3x4,
    RowMajor4x2,
    RowMajor4x3,
}

impl CustomFunction {
    /// The conversion helper for a non-square row-major matrix shape, if
    /// the shape has one. Square shapes just use `transpose()`.
    pub(super) const fn row_major_conversion(columns: u32, rows: u32) -> Option<CustomFunction> {
        match (columns, rows) {
            (2, 3) => Some(CustomFunction::RowMajor2x3),
            (2, 4) => Some(CustomFunction::RowMajor2x4),
            (3, 2) => Some(CustomFunction::RowMajor3x2),
            (3, 4) => Some(CustomFunction::RowMajor3x4),
            (4, 2) => Some(CustomFunction::RowMajor4x2),
            (4, 3) => Some(CustomFunction::RowMajor4x3),
            _ => None,
        }
    }
}

impl<'a> Writer<'a> {
    /// Emit the bodies of every registered helper, in registry order.
    pub(super) fn emit_custom_functions(&mut self) -> BackendResult {
        let mut det2x2_emitted = false;
        for function in self.custom_functions.clone() {
            match function {
                CustomFunction::Mod => {
                    statement(self, "// Implementation of the GLSL mod() function, which is slightly different than Metal fmod()");
                    statement(self, "template<typename Tx, typename Ty>");
                    statement(self, "Tx mod(Tx x, Ty y)");
                    begin_scope(self);
                    statement(self, "return x - y * floor(x / y);");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::Radians => {
                    statement(self, "// Implementation of the GLSL radians() function");
                    statement(self, "template<typename T>");
                    statement(self, "T radians(T d)");
                    begin_scope(self);
                    statement(self, "return d * 0.01745329251;");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::Degrees => {
                    statement(self, "// Implementation of the GLSL degrees() function");
                    statement(self, "template<typename T>");
                    statement(self, "T degrees(T r)");
                    begin_scope(self);
                    statement(self, "return r * 57.2957795131;");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::FindILsb => {
                    statement(self, "// Implementation of the GLSL findLSB() function");
                    statement(self, "template<typename T>");
                    statement(self, "T findLSB(T x)");
                    begin_scope(self);
                    statement(self, "return select(ctz(x), T(-1), x == T(0));");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::FindUMsb => {
                    statement(self, "// Implementation of the unsigned GLSL findMSB() function");
                    statement(self, "template<typename T>");
                    statement(self, "T findUMSB(T x)");
                    begin_scope(self);
                    statement(self, "return select(clz(T(0)) - (clz(x) + T(1)), T(-1), x == T(0));");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::FindSMsb => {
                    statement(self, "// Implementation of the signed GLSL findMSB() function");
                    statement(self, "template<typename T>");
                    statement(self, "T findSMSB(T x)");
                    begin_scope(self);
                    statement(self, "T v = select(x, T(-1) - x, x < T(0));");
                    statement(self, "return select(clz(T(0)) - (clz(v) + T(1)), T(-1), v == T(0));");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::ArrayCopy => {
                    statement(self, "// Implementation of an array copy function to cover GLSL's ability to copy an array via assignment.");
                    statement(self, "template<typename T>");
                    statement(self, "void spvArrayCopy(thread T* dst, thread const T* src, uint count)");
                    begin_scope(self);
                    statement(self, "for (uint i = 0; i < count; *dst++ = *src++, i++);");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::Inverse2x2 => {
                    self.emit_inverse_preamble();
                    statement(self, "float2x2 spvInverse2x2(float2x2 m)");
                    begin_scope(self);
                    statement(self, "float2x2 adj;\t// The adjoint matrix (inverse after dividing by determinant)");
                    statement(self, "");
                    statement(self, "// Create the transpose of the cofactors, as the classical adjoint of the matrix.");
                    statement(self, "adj[0][0] =  m[1][1];");
                    statement(self, "adj[0][1] = -m[0][1];");
                    statement(self, "");
                    statement(self, "adj[1][0] = -m[1][0];");
                    statement(self, "adj[1][1] =  m[0][0];");
                    statement(self, "");
                    statement(self, "// Calculate the determinant as a combination of the cofactors of the first row.");
                    statement(self, "float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]);");
                    statement(self, "");
                    statement(self, "// Divide the classical adjoint matrix by the determinant.");
                    statement(self, "// If determinant is zero, matrix is not invertable, so leave it unchanged.");
                    statement(self, "return (det != 0.0f) ? (adj * (1.0f / det)) : m;");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::Inverse3x3 => {
                    if !det2x2_emitted {
                        self.emit_det2x2();
                        det2x2_emitted = true;
                    }
                    self.emit_inverse_preamble();
                    statement(self, "float3x3 spvInverse3x3(float3x3 m)");
                    begin_scope(self);
                    statement(self, "float3x3 adj;\t// The adjoint matrix (inverse after dividing by determinant)");
                    statement(self, "");
                    statement(self, "// Create the transpose of the cofactors, as the classical adjoint of the matrix.");
                    statement(self, "adj[0][0] =  spvDet2x2(m[1][1], m[1][2], m[2][1], m[2][2]);");
                    statement(self, "adj[0][1] = -spvDet2x2(m[0][1], m[0][2], m[2][1], m[2][2]);");
                    statement(self, "adj[0][2] =  spvDet2x2(m[0][1], m[0][2], m[1][1], m[1][2]);");
                    statement(self, "");
                    statement(self, "adj[1][0] = -spvDet2x2(m[1][0], m[1][2], m[2][0], m[2][2]);");
                    statement(self, "adj[1][1] =  spvDet2x2(m[0][0], m[0][2], m[2][0], m[2][2]);");
                    statement(self, "adj[1][2] = -spvDet2x2(m[0][0], m[0][2], m[1][0], m[1][2]);");
                    statement(self, "");
                    statement(self, "adj[2][0] =  spvDet2x2(m[1][0], m[1][1], m[2][0], m[2][1]);");
                    statement(self, "adj[2][1] = -spvDet2x2(m[0][0], m[0][1], m[2][0], m[2][1]);");
                    statement(self, "adj[2][2] =  spvDet2x2(m[0][0], m[0][1], m[1][0], m[1][1]);");
                    statement(self, "");
                    statement(self, "// Calculate the determinant as a combination of the cofactors of the first row.");
                    statement(self, "float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]) + (adj[0][2] * m[2][0]);");
                    statement(self, "");
                    statement(self, "// Divide the classical adjoint matrix by the determinant.");
                    statement(self, "// If determinant is zero, matrix is not invertable, so leave it unchanged.");
                    statement(self, "return (det != 0.0f) ? (adj * (1.0f / det)) : m;");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::Inverse4x4 => {
                    if !det2x2_emitted {
                        self.emit_det2x2();
                        det2x2_emitted = true;
                    }
                    statement(self, "// Returns the determinant of a 3x3 matrix.");
                    statement(self, "inline float spvDet3x3(float a1, float a2, float a3, float b1, float b2, float b3, float c1, float c2, float c3)");
                    begin_scope(self);
                    statement(self, "return a1 * spvDet2x2(b2, b3, c2, c3) - b1 * spvDet2x2(a2, a3, c2, c3) + c1 * spvDet2x2(a2, a3, b2, b3);");
                    end_scope(self);
                    statement(self, "");
                    self.emit_inverse_preamble();
                    statement(self, "float4x4 spvInverse4x4(float4x4 m)");
                    begin_scope(self);
                    statement(self, "float4x4 adj;\t// The adjoint matrix (inverse after dividing by determinant)");
                    statement(self, "");
                    statement(self, "// Create the transpose of the cofactors, as the classical adjoint of the matrix.");
                    statement(self, "adj[0][0] =  spvDet3x3(m[1][1], m[1][2], m[1][3], m[2][1], m[2][2], m[2][3], m[3][1], m[3][2], m[3][3]);");
                    statement(self, "adj[0][1] = -spvDet3x3(m[0][1], m[0][2], m[0][3], m[2][1], m[2][2], m[2][3], m[3][1], m[3][2], m[3][3]);");
                    statement(self, "adj[0][2] =  spvDet3x3(m[0][1], m[0][2], m[0][3], m[1][1], m[1][2], m[1][3], m[3][1], m[3][2], m[3][3]);");
                    statement(self, "adj[0][3] = -spvDet3x3(m[0][1], m[0][2], m[0][3], m[1][1], m[1][2], m[1][3], m[2][1], m[2][2], m[2][3]);");
                    statement(self, "");
                    statement(self, "adj[1][0] = -spvDet3x3(m[1][0], m[1][2], m[1][3], m[2][0], m[2][2], m[2][3], m[3][0], m[3][2], m[3][3]);");
                    statement(self, "adj[1][1] =  spvDet3x3(m[0][0], m[0][2], m[0][3], m[2][0], m[2][2], m[2][3], m[3][0], m[3][2], m[3][3]);");
                    statement(self, "adj[1][2] = -spvDet3x3(m[0][0], m[0][2], m[0][3], m[1][0], m[1][2], m[1][3], m[3][0], m[3][2], m[3][3]);");
                    statement(self, "adj[1][3] =  spvDet3x3(m[0][0], m[0][2], m[0][3], m[1][0], m[1][2], m[1][3], m[2][0], m[2][2], m[2][3]);");
                    statement(self, "");
                    statement(self, "adj[2][0] =  spvDet3x3(m[1][0], m[1][1], m[1][3], m[2][0], m[2][1], m[2][3], m[3][0], m[3][1], m[3][3]);");
                    statement(self, "adj[2][1] = -spvDet3x3(m[0][0], m[0][1], m[0][3], m[2][0], m[2][1], m[2][3], m[3][0], m[3][1], m[3][3]);");
                    statement(self, "adj[2][2] =  spvDet3x3(m[0][0], m[0][1], m[0][3], m[1][0], m[1][1], m[1][3], m[3][0], m[3][1], m[3][3]);");
                    statement(self, "adj[2][3] = -spvDet3x3(m[0][0], m[0][1], m[0][3], m[1][0], m[1][1], m[1][3], m[2][0], m[2][1], m[2][3]);");
                    statement(self, "");
                    statement(self, "adj[3][0] = -spvDet3x3(m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2], m[3][0], m[3][1], m[3][2]);");
                    statement(self, "adj[3][1] =  spvDet3x3(m[0][0], m[0][1], m[0][2], m[2][0], m[2][1], m[2][2], m[3][0], m[3][1], m[3][2]);");
                    statement(self, "adj[3][2] = -spvDet3x3(m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[3][0], m[3][1], m[3][2]);");
                    statement(self, "adj[3][3] =  spvDet3x3(m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2]);");
                    statement(self, "");
                    statement(self, "// Calculate the determinant as a combination of the cofactors of the first row.");
                    statement(self, "float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]) + (adj[0][2] * m[2][0]) + (adj[0][3] * m[3][0]);");
                    statement(self, "");
                    statement(self, "// Divide the classical adjoint matrix by the determinant.");
                    statement(self, "// If determinant is zero, matrix is not invertable, so leave it unchanged.");
                    statement(self, "return (det != 0.0f) ? (adj * (1.0f / det)) : m;");
                    end_scope(self);
                    statement(self, "");
                }

                CustomFunction::RowMajor2x3 => self.emit_row_major_converter(
                    "float2x3 spvConvertFromRowMajor2x3(float2x3 m)",
                    "return float2x3(float3(m[0][0], m[0][2], m[1][1]), float3(m[0][1], m[1][0], m[1][2]));",
                ),
                CustomFunction::RowMajor2x4 => self.emit_row_major_converter(
                    "float2x4 spvConvertFromRowMajor2x4(float2x4 m)",
                    "return float2x4(float4(m[0][0], m[0][2], m[1][0], m[1][2]), float4(m[0][1], m[0][3], m[1][1], m[1][3]));",
                ),
                CustomFunction::RowMajor3x2 => self.emit_row_major_converter(
                    "float3x2 spvConvertFromRowMajor3x2(float3x2 m)",
                    "return float3x2(float2(m[0][0], m[1][1]), float2(m[0][1], m[2][0]), float2(m[1][0], m[2][1]));",
                ),
                CustomFunction::RowMajor3x4 => self.emit_row_major_converter(
                    "float3x4 spvConvertFromRowMajor3x4(float3x4 m)",
                    "return float3x4(float4(m[0][0], m[0][3], m[1][2], m[2][1]), float4(m[0][1], m[1][0], m[1][3], m[2][2]), float4(m[0][2], m[1][1], m[2][0], m[2][3]));",
                ),
                CustomFunction::RowMajor4x2 => self.emit_row_major_converter(
                    "float4x2 spvConvertFromRowMajor4x2(float4x2 m)",
                    "return float4x2(float2(m[0][0], m[2][0]), float2(m[0][1], m[2][1]), float2(m[1][0], m[3][0]), float2(m[1][1], m[3][1]));",
                ),
                CustomFunction::RowMajor4x3 => self.emit_row_major_converter(
                    "float4x3 spvConvertFromRowMajor4x3(float4x3 m)",
                    "return float4x3(float3(m[0][0], m[1][1], m[2][2]), float3(m[0][1], m[1][2], m[3][0]), float3(m[0][2], m[2][0], m[3][1]), float3(m[1][0], m[2][1], m[3][2]));",
                ),
            }
        }
        Ok(())
    }

    fn emit_det2x2(&mut self) {
        statement(self, "// Returns the determinant of a 2x2 matrix.");
        statement(self, "inline float spvDet2x2(float a1, float a2, float b1, float b2)");
        begin_scope(self);
        statement(self, "return a1 * b2 - b1 * a2;");
        end_scope(self);
        statement(self, "");
    }

    fn emit_inverse_preamble(&mut self) {
        statement(self, "// Returns the inverse of a matrix, by using the algorithm of calculating the classical");
        statement(self, "// adjoint and dividing by the determinant. The contents of the matrix are changed.");
    }

    fn emit_row_major_converter(&mut self, signature: &str, body: &str) {
        statement(self, "// Implementation of a conversion of matrix content from RowMajor to ColumnMajor organization.");
        statement(self, signature);
        begin_scope(self);
        statement(self, body);
        end_scope(self);
        statement(self, "");
    }
}
