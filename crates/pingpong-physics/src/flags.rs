//! CPU mirror of per-element pin state

/// Pinned/free state for every element of a simulation.
///
/// The layout captured at construction is the reset target: `reset` restores
/// it exactly, so a rope's endpoints come back pinned no matter how often they
/// were toggled in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementFlags {
    pinned: Vec<bool>,
    initial: Vec<bool>,
}

impl ElementFlags {
    /// `n` flags with exactly the two endpoints (`0` and `n - 1`) pinned.
    pub fn new(n: usize) -> Self {
        let mut pinned = vec![false; n];
        if let Some(first) = pinned.first_mut() {
            *first = true;
        }
        if let Some(last) = pinned.last_mut() {
            *last = true;
        }
        Self::from_layout(pinned)
    }

    /// `n` flags with nothing pinned.
    pub fn all_free(n: usize) -> Self {
        Self::from_layout(vec![false; n])
    }

    fn from_layout(pinned: Vec<bool>) -> Self {
        Self {
            initial: pinned.clone(),
            pinned,
        }
    }

    /// Flip the flag at `index` and return the new state.
    pub fn toggle(&mut self, index: usize) -> bool {
        let flag = &mut self.pinned[index];
        *flag = !*flag;
        *flag
    }

    pub fn set(&mut self, index: usize, pinned: bool) {
        self.pinned[index] = pinned;
    }

    /// Restore the construction-time layout.
    pub fn reset(&mut self) {
        self.pinned.copy_from_slice(&self.initial);
    }

    pub fn is_pinned(&self, index: usize) -> bool {
        self.pinned[index]
    }

    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.pinned
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.iter().filter(|&&p| p).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_pinned_on_construction() {
        let flags = ElementFlags::new(20);
        assert!(flags.is_pinned(0));
        assert!(flags.is_pinned(19));
        assert_eq!(flags.pinned_count(), 2);
    }

    #[test]
    fn single_element_is_both_endpoints() {
        let flags = ElementFlags::new(1);
        assert!(flags.is_pinned(0));
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn reset_restores_initial_layout() {
        let mut flags = ElementFlags::new(5);
        assert!(!flags.toggle(0));
        assert!(flags.toggle(2));
        flags.set(4, false);

        flags.reset();

        assert_eq!(flags.as_slice(), &[true, false, false, false, true]);
    }

    #[test]
    fn all_free_resets_to_all_free() {
        let mut flags = ElementFlags::all_free(3);
        flags.toggle(1);
        flags.reset();
        assert_eq!(flags.pinned_count(), 0);
    }

    #[test]
    #[should_panic]
    fn toggle_out_of_range_panics() {
        let mut flags = ElementFlags::new(3);
        flags.toggle(3);
    }
}
