//! # Help Text
//!
//! Command summary displayed via `!tts help`.

pub const MAIN: &str = concat!(
    "🤖 Herald commands: ",
    "!tts <text> | !tts stop | !tts status | !music <prompt> [--no <avoid>] | !music status | ",
    "!voice <id> | !voice reset. ",
    "Mods: !tts on/off, !tts mode all/command/bits, !tts voice|pitch|speed|emotion|permission <value>, ",
    "!tts bits on/off/min <n>, !tts ignore|unignore <user>, !tts clear, !music on/off, !music clear"
);
