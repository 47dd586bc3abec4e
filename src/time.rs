/// Game clock driven by the host loop. Frame waits read `frame`, timed waits
/// read the scaled delta.
#[derive(Debug, Clone)]
pub struct GameTime {
    frame: u64,
    speed_factor: f32,
    elapsed: f32,
    pub delta: f32,
}

impl GameTime {
    pub fn new(speed_factor: f32) -> Self {
        Self { frame: 0, speed_factor: speed_factor.max(0.0), elapsed: 0.0, delta: 0.0 }
    }

    /// Advances one tick and returns the scaled delta.
    pub fn tick(&mut self, dt: f32) -> f32 {
        self.frame += 1;
        self.delta = dt.max(0.0) * self.speed_factor;
        self.elapsed += self.delta;
        self.delta
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn speed_factor(&self) -> f32 {
        self.speed_factor
    }

    pub fn set_speed_factor(&mut self, factor: f32) {
        self.speed_factor = factor.max(0.0);
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed
    }
}

impl Default for GameTime {
    fn default() -> Self {
        Self::new(1.0)
    }
}
