// ============================================================================
// HISTORY — linear full-frame snapshot undo/redo
// ============================================================================
//
// One stack of immutable snapshots plus a cursor.  `commit` is the only
// producer; undo/redo only move the cursor and restore.  Snapshots deep-copy
// every layer's pixels — O(layers × W × H × 4) per commit, deliberately
// simple and bit-exact, with a count cap as the pressure valve (oldest
// states fall off first).
// ============================================================================

use image::RgbaImage;

use crate::canvas::{BlendMode, Layer, LayerAffine, LayerId, LayerStack};
use crate::error::EngineError;

/// Deep copy of one layer.  Keeps the layer's id, so restoring maps back
/// onto the same GPU resources.
#[derive(Clone)]
struct LayerSnapshot {
    id: LayerId,
    name: String,
    visible: bool,
    opacity: f32,
    blend_mode: BlendMode,
    transform: LayerAffine,
    pixels: RgbaImage,
}

impl LayerSnapshot {
    fn capture(layer: &Layer) -> Self {
        Self {
            id: layer.id,
            name: layer.name.clone(),
            visible: layer.visible,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode,
            transform: layer.transform,
            // Value copy — snapshots never alias the live buffer.
            pixels: layer.pixels.clone(),
        }
    }
}

/// Immutable canvas state at one commit.
pub struct HistoryState {
    layers: Vec<LayerSnapshot>,
    active_index: usize,
    width: u32,
    height: u32,
}

impl HistoryState {
    pub fn capture(stack: &LayerStack) -> Self {
        Self {
            layers: stack.layers.iter().map(LayerSnapshot::capture).collect(),
            active_index: stack.active_index,
            width: stack.width,
            height: stack.height,
        }
    }

    /// Validate shape against the live stack, then fully replace it.
    /// On mismatch the live stack is left untouched.
    fn restore_into(&self, stack: &mut LayerStack) -> Result<(), EngineError> {
        if self.width != stack.width || self.height != stack.height {
            return Err(EngineError::HistoryCorruption(format!(
                "snapshot is {}x{}, canvas is {}x{}",
                self.width, self.height, stack.width, stack.height
            )));
        }
        let expected = (self.width as usize) * (self.height as usize) * 4;
        for snap in &self.layers {
            if snap.pixels.as_raw().len() != expected {
                return Err(EngineError::HistoryCorruption(format!(
                    "layer {} buffer is {} bytes, expected {}",
                    snap.id,
                    snap.pixels.as_raw().len(),
                    expected
                )));
            }
        }

        let restored = self
            .layers
            .iter()
            .map(|snap| {
                // The GPU store compares generations; anything different
                // from what it last uploaded forces a lazy re-upload on the
                // next frame.
                let generation = stack
                    .get(snap.id)
                    .map(|live| live.gpu_generation.wrapping_add(1))
                    .unwrap_or(0);
                Layer {
                    id: snap.id,
                    name: snap.name.clone(),
                    visible: snap.visible,
                    opacity: snap.opacity,
                    blend_mode: snap.blend_mode,
                    pixels: snap.pixels.clone(),
                    transform: snap.transform,
                    gpu_generation: generation,
                }
            })
            .collect();

        stack.layers = restored;
        stack.active_index = self.active_index.min(self.layers.len().saturating_sub(1));
        Ok(())
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.pixels.as_raw().len() + l.name.len())
            .sum()
    }
}

pub struct HistoryManager {
    states: Vec<HistoryState>,
    /// Index of the state the live canvas currently matches; -1 before the
    /// first commit.
    cursor: isize,
    max_snapshots: usize,
}

impl HistoryManager {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            states: Vec::new(),
            cursor: -1,
            max_snapshots: max_snapshots.max(1),
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.states.len() as isize - 1
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    /// Snapshot the live stack: discard any redo states beyond the cursor,
    /// append, advance.
    pub fn commit(&mut self, stack: &LayerStack) {
        self.states.truncate((self.cursor + 1) as usize);
        self.states.push(HistoryState::capture(stack));
        self.cursor = self.states.len() as isize - 1;
        self.prune();
    }

    /// Step the cursor back and restore.  Fails without touching the live
    /// stack when already at the oldest state (or before any commit).
    pub fn undo(&mut self, stack: &mut LayerStack) -> Result<(), EngineError> {
        if !self.can_undo() {
            return Err(EngineError::HistoryExhausted("undo"));
        }
        let target = (self.cursor - 1) as usize;
        self.states[target].restore_into(stack)?;
        self.cursor -= 1;
        Ok(())
    }

    /// Step the cursor forward and restore.
    pub fn redo(&mut self, stack: &mut LayerStack) -> Result<(), EngineError> {
        if !self.can_redo() {
            return Err(EngineError::HistoryExhausted("redo"));
        }
        let target = (self.cursor + 1) as usize;
        self.states[target].restore_into(stack)?;
        self.cursor += 1;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.cursor = -1;
    }

    pub fn memory_bytes(&self) -> usize {
        self.states.iter().map(HistoryState::memory_bytes).sum()
    }

    /// Drop oldest states past the cap.  The cursor shifts with them; undo
    /// depth shrinks but the current state always survives.
    fn prune(&mut self) {
        while self.states.len() > self.max_snapshots {
            self.states.remove(0);
            self.cursor = (self.cursor - 1).max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn stack_with_pixel(v: u8) -> LayerStack {
        let mut stack = LayerStack::new(4, 4);
        stack.layers[0].pixels.put_pixel(1, 1, Rgba([v, 0, 0, 255]));
        stack
    }

    fn pixel(stack: &LayerStack) -> u8 {
        stack.layers[0].pixels.get_pixel(1, 1).0[0]
    }

    #[test]
    fn commit_undo_redo_round_trip_is_bit_identical() {
        let mut history = HistoryManager::new(16);
        let mut stack = stack_with_pixel(10);
        history.commit(&stack);

        let before: Vec<u8> = stack.layers[0].pixels.as_raw().clone();
        stack.layers[0].pixels.put_pixel(1, 1, Rgba([99, 0, 0, 255]));
        stack.layers[0].invalidate_gpu();
        history.commit(&stack);
        let after: Vec<u8> = stack.layers[0].pixels.as_raw().clone();

        history.undo(&mut stack).unwrap();
        assert_eq!(stack.layers[0].pixels.as_raw(), &before);

        history.redo(&mut stack).unwrap();
        assert_eq!(stack.layers[0].pixels.as_raw(), &after);
    }

    #[test]
    fn undo_at_oldest_state_is_rejected_and_harmless() {
        let mut history = HistoryManager::new(16);
        let mut stack = stack_with_pixel(42);
        history.commit(&stack);

        assert!(matches!(
            history.undo(&mut stack),
            Err(EngineError::HistoryExhausted("undo"))
        ));
        assert_eq!(pixel(&stack), 42);
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn redo_past_newest_state_is_rejected() {
        let mut history = HistoryManager::new(16);
        let mut stack = stack_with_pixel(1);
        history.commit(&stack);
        assert!(history.redo(&mut stack).is_err());
    }

    #[test]
    fn commit_discards_redo_branch() {
        let mut history = HistoryManager::new(16);
        let mut stack = stack_with_pixel(1);
        history.commit(&stack);

        stack.layers[0].pixels.put_pixel(1, 1, Rgba([2, 0, 0, 255]));
        history.commit(&stack);
        history.undo(&mut stack).unwrap();

        stack.layers[0].pixels.put_pixel(1, 1, Rgba([3, 0, 0, 255]));
        history.commit(&stack);

        // The state with value 2 is gone; no branching redo.
        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        history.undo(&mut stack).unwrap();
        assert_eq!(pixel(&stack), 1);
    }

    #[test]
    fn restore_preserves_layer_ids() {
        let mut history = HistoryManager::new(16);
        let mut stack = LayerStack::new(4, 4);
        let id = stack.layers[0].id;
        history.commit(&stack);
        stack.layers[0].pixels.put_pixel(0, 0, Rgba([9, 9, 9, 255]));
        history.commit(&stack);
        history.undo(&mut stack).unwrap();
        assert_eq!(stack.layers[0].id, id);
    }

    #[test]
    fn restore_bumps_generation_for_lazy_reupload() {
        let mut history = HistoryManager::new(16);
        let mut stack = LayerStack::new(4, 4);
        history.commit(&stack);
        stack.layers[0].invalidate_gpu();
        history.commit(&stack);
        let live_gen = stack.layers[0].gpu_generation;
        history.undo(&mut stack).unwrap();
        assert_ne!(stack.layers[0].gpu_generation, live_gen);
    }

    #[test]
    fn size_mismatch_fails_without_mutation() {
        let mut history = HistoryManager::new(16);
        let mut stack = stack_with_pixel(7);
        history.commit(&stack);
        stack.layers[0].pixels.put_pixel(1, 1, Rgba([8, 0, 0, 255]));
        history.commit(&stack);

        // Simulate a host-side resize between commit and undo.
        stack.width = 8;
        let err = history.undo(&mut stack);
        assert!(matches!(err, Err(EngineError::HistoryCorruption(_))));
        assert_eq!(pixel(&stack), 8);
        // Cursor did not move either.
        assert!(history.can_undo());
    }

    #[test]
    fn prune_drops_oldest_and_keeps_current() {
        let mut history = HistoryManager::new(3);
        let mut stack = stack_with_pixel(0);
        for v in 0..5u8 {
            stack.layers[0].pixels.put_pixel(1, 1, Rgba([v, 0, 0, 255]));
            history.commit(&stack);
        }
        assert_eq!(history.len(), 3);
        // Two undos exhaust the pruned stack.
        history.undo(&mut stack).unwrap();
        history.undo(&mut stack).unwrap();
        assert!(history.undo(&mut stack).is_err());
        assert_eq!(pixel(&stack), 2);
    }
}
