//! VM safety limits and debug switch.

/// Runtime configuration for a [`Vm`](super::Vm).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum number of live call frames, main included.
    pub max_call_depth: usize,
    /// Maximum number of values on the operand stack.
    pub max_stack_size: usize,
    /// Print VM state to stderr before every instruction.
    pub debug: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1024,
            max_stack_size: 2048,
            debug: false,
        }
    }
}

impl VmConfig {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_stack_size(mut self, size: usize) -> Self {
        self.max_stack_size = size;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builders() {
        let config = VmConfig::default();
        assert_eq!(config.max_call_depth, 1024);
        assert_eq!(config.max_stack_size, 2048);
        assert!(!config.debug);

        let config = config
            .with_max_call_depth(8)
            .with_max_stack_size(16)
            .with_debug(true);
        assert_eq!(
            config,
            VmConfig {
                max_call_depth: 8,
                max_stack_size: 16,
                debug: true,
            }
        );
    }
}
