//! Bound GPU state tracking
//!
//! Each setter returns `true` only when the value actually changes, so backends issue
//! (or record) a state change only when it matters.

use crate::backend::traits::*;
use crate::backend::types::Viewport;

/// Number of texture units tracked
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Currently bound pipeline state
#[derive(Debug, Clone, Default)]
pub struct GpuState {
    framebuffer: Option<FramebufferId>,
    viewport: Option<Viewport>,
    program: Option<ProgramId>,
    vertex_buffer: Option<BufferId>,
    textures: [Option<TextureId>; MAX_TEXTURE_UNITS],
    depth_test: bool,
    face_culling: bool,
    blending: bool,
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

impl GpuState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_framebuffer(&mut self, framebuffer: FramebufferId) -> bool {
        replace(&mut self.framebuffer, Some(framebuffer))
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        replace(&mut self.viewport, Some(viewport))
    }

    pub fn set_program(&mut self, program: ProgramId) -> bool {
        replace(&mut self.program, Some(program))
    }

    pub fn set_vertex_buffer(&mut self, buffer: BufferId) -> bool {
        replace(&mut self.vertex_buffer, Some(buffer))
    }

    pub fn set_texture(&mut self, unit: u32, texture: TextureId) -> BackendResult<bool> {
        let slot = self
            .textures
            .get_mut(unit as usize)
            .ok_or(BackendError::UnknownObject {
                kind: "texture unit",
                id: unit as u64,
            })?;
        Ok(replace(slot, Some(texture)))
    }

    pub fn set_depth_test(&mut self, enabled: bool) -> bool {
        replace(&mut self.depth_test, enabled)
    }

    pub fn set_face_culling(&mut self, enabled: bool) -> bool {
        replace(&mut self.face_culling, enabled)
    }

    pub fn set_blending(&mut self, enabled: bool) -> bool {
        replace(&mut self.blending, enabled)
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn vertex_buffer(&self) -> Option<BufferId> {
        self.vertex_buffer
    }

    pub fn texture(&self, unit: u32) -> Option<TextureId> {
        self.textures.get(unit as usize).copied().flatten()
    }

    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    pub fn face_culling(&self) -> bool {
        self.face_culling
    }

    pub fn blending(&self) -> bool {
        self.blending
    }

    /// Drop every reference to a destroyed texture
    pub fn forget_texture(&mut self, texture: TextureId) {
        for slot in self.textures.iter_mut() {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
    }

    pub fn forget_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
            self.viewport = None;
        }
    }

    pub fn forget_program(&mut self, program: ProgramId) {
        if self.program == Some(program) {
            self.program = None;
        }
    }

    pub fn forget_buffer(&mut self, buffer: BufferId) {
        if self.vertex_buffer == Some(buffer) {
            self.vertex_buffer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redundant_binds_are_reported() {
        let mut state = GpuState::new();
        assert!(state.set_framebuffer(FramebufferId(1)));
        assert!(!state.set_framebuffer(FramebufferId(1)));
        assert!(state.set_framebuffer(FramebufferId(2)));

        assert!(state.set_texture(0, TextureId(7)).unwrap());
        assert!(!state.set_texture(0, TextureId(7)).unwrap());
        assert!(state.set_texture(1, TextureId(7)).unwrap());

        assert!(!state.set_depth_test(false));
        assert!(state.set_depth_test(true));
    }

    #[test]
    fn test_forget_texture_unbinds_all_units() {
        let mut state = GpuState::new();
        state.set_texture(0, TextureId(3)).unwrap();
        state.set_texture(4, TextureId(3)).unwrap();
        state.forget_texture(TextureId(3));
        assert_eq!(state.texture(0), None);
        assert_eq!(state.texture(4), None);
        assert!(state.set_texture(0, TextureId(3)).unwrap());
    }

    #[test]
    fn test_texture_unit_out_of_range() {
        let mut state = GpuState::new();
        assert!(state.set_texture(MAX_TEXTURE_UNITS as u32, TextureId(1)).is_err());
    }
}
