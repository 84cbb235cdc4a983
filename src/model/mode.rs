/// Selects training or inference behavior for dropout and batch normalization.
///
/// Passed explicitly into every forward call so a training run and a serving
/// path sharing the same weights cannot influence each other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ForwardMode {
    /// Dropout active, batch statistics used and running statistics updated.
    Train,
    /// Dropout disabled, running statistics used.
    #[default]
    Inference,
}

impl ForwardMode {
    /// True for [`ForwardMode::Train`].
    pub fn is_train(self) -> bool {
        matches!(self, Self::Train)
    }
}
