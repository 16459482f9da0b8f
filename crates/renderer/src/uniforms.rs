use crate::compile::{UniformKind, UniformLayout};

/// Host copy of a program's uniform block.
///
/// Writes address members by name through the reflected layout. A name the
/// program does not declare (or declares with another type) is ignored and the
/// setter returns `false`, the same way a missing GL uniform location turns a
/// write into a no-op.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    layout: UniformLayout,
    bytes: Vec<u8>,
}

impl UniformBlock {
    pub fn new(layout: UniformLayout) -> Self {
        let size = (layout.size.max(16) as usize).next_multiple_of(16);
        Self {
            layout,
            bytes: vec![0; size],
        }
    }

    pub fn empty() -> Self {
        Self::new(UniformLayout::default())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn set_f32(&mut self, name: &str, value: f32) -> bool {
        match self.offset_of(name, UniformKind::Float) {
            Some(offset) => {
                self.write(offset, &value.to_ne_bytes());
                true
            }
            None => false,
        }
    }

    pub fn set_vec2(&mut self, name: &str, value: [f32; 2]) -> bool {
        match self.offset_of(name, UniformKind::Vec2) {
            Some(offset) => {
                self.write(offset, bytemuck::bytes_of(&value));
                true
            }
            None => false,
        }
    }

    /// Writes `values` into an `int[]` member, zero-filling the unused tail.
    pub fn set_int_array(&mut self, name: &str, values: &[i32]) -> bool {
        let Some(field) = self.layout.field(name) else {
            return false;
        };
        let UniformKind::IntArray { len, stride } = field.kind else {
            return false;
        };
        let base = field.offset as usize;
        if values.len() > len as usize {
            tracing::warn!(
                uniform = name,
                len,
                provided = values.len(),
                "uniform array truncated"
            );
        }
        for slot in 0..len as usize {
            let value = values.get(slot).copied().unwrap_or(0);
            self.write(base + slot * stride as usize, &value.to_ne_bytes());
        }
        true
    }

    pub fn get_f32(&self, name: &str) -> Option<f32> {
        let offset = self.offset_of(name, UniformKind::Float)?;
        Some(bytemuck::pod_read_unaligned(&self.bytes[offset..offset + 4]))
    }

    pub fn get_vec2(&self, name: &str) -> Option<[f32; 2]> {
        let offset = self.offset_of(name, UniformKind::Vec2)?;
        Some(bytemuck::pod_read_unaligned(&self.bytes[offset..offset + 8]))
    }

    pub fn get_int_array(&self, name: &str) -> Option<Vec<i32>> {
        let field = self.layout.field(name)?;
        let UniformKind::IntArray { len, stride } = field.kind else {
            return None;
        };
        let base = field.offset as usize;
        Some(
            (0..len as usize)
                .map(|slot| {
                    let at = base + slot * stride as usize;
                    bytemuck::pod_read_unaligned(&self.bytes[at..at + 4])
                })
                .collect(),
        )
    }

    fn offset_of(&self, name: &str, kind: UniformKind) -> Option<usize> {
        self.layout
            .field(name)
            .filter(|field| field.kind == kind)
            .map(|field| field.offset as usize)
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        if let Some(target) = self.bytes.get_mut(offset..offset + data.len()) {
            target.copy_from_slice(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{build_program, COMPOSITOR_FRAGMENT, COMPOSITOR_VERTEX};
    use crate::compile::{CROSS_FRAGMENT, FULLSCREEN_VERTEX, U_MOUSE, U_POS, U_SAMPLERS, U_TIME};

    #[test]
    fn writes_by_name_and_ignores_unknown() {
        let program = build_program(FULLSCREEN_VERTEX, CROSS_FRAGMENT).expect("program");
        let mut block = UniformBlock::new(program.uniform_layout().clone());
        assert_eq!(block.as_bytes().len() % 16, 0);

        assert!(block.set_vec2(U_POS, [12.0, 34.0]));
        assert!(block.set_f32(U_TIME, 1.5));
        assert!(!block.set_vec2("uDoesNotExist", [1.0, 1.0]));
        assert!(!block.set_f32(U_POS, 3.0), "type mismatch is a no-op");

        assert_eq!(block.get_vec2(U_POS), Some([12.0, 34.0]));
        assert_eq!(block.get_f32(U_TIME), Some(1.5));
        assert_eq!(block.get_vec2(U_MOUSE), Some([0.0, 0.0]));
    }

    #[test]
    fn int_array_is_zero_padded() {
        let program = build_program(COMPOSITOR_VERTEX, COMPOSITOR_FRAGMENT).expect("program");
        let mut block = UniformBlock::new(program.uniform_layout().clone());
        assert!(block.set_int_array(U_SAMPLERS, &[0, 1, 2, 3]));
        assert!(block.set_int_array(U_SAMPLERS, &[0, 1]));
        assert_eq!(
            block.get_int_array(U_SAMPLERS),
            Some(vec![0, 1, 0, 0, 0, 0, 0, 0])
        );
    }

    #[test]
    fn empty_block_accepts_nothing() {
        let mut block = UniformBlock::empty();
        assert_eq!(block.as_bytes().len(), 16);
        assert!(!block.set_f32(U_TIME, 1.0));
    }
}
