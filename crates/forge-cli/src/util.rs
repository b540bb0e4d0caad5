#[derive(Debug, Clone, Copy)]
pub struct Verbosity {
    pub verbose: bool,
}
