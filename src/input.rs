use bitflags::bitflags;

bitflags! {
    /// Global input lock state shared between scripts, cutscenes and the UI layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InputState: u8 {
        const INPUT_ENABLED = 0b0001;
        const VERBS_ENABLED = 0b0010;
        const CURSOR_VISIBLE = 0b0100;
        const HUD_VISIBLE = 0b1000;
    }
}

impl InputState {
    pub fn input_active(self) -> bool {
        self.contains(InputState::INPUT_ENABLED)
    }

    /// State applied while a cutscene owns the screen.
    pub fn locked(self) -> Self {
        self - InputState::INPUT_ENABLED
    }
}

impl Default for InputState {
    fn default() -> Self {
        InputState::all()
    }
}
