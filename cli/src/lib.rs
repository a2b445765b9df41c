// Copyright (c) 2025 Jingju Portal Contributors
// SPDX-License-Identifier: MIT

pub mod repl;
pub mod settings;

const JINGJU_CHAT_LOGO: [&str; 6] = [
    "     ██┐██┐███┐   ██┐ ██████┐      ██┐██┐   ██┐",
    "     ██│██│████┐  ██│██┌────┘      ██│██│   ██│",
    "     ██│██│██┌██┐ ██│██│  ███┐     ██│██│   ██│",
    "██   ██│██│██│└██┐██│██│   ██│██   ██│██│   ██│",
    "└█████┌┘██│██│ └████│└██████┌┘└█████┌┘└██████┌┘",
    " └────┘ └─┘└─┘  └───┘ └─────┘  └────┘  └─────┘ ",
];

const SHADOW_CHARS: &[char] = &['└', '┌', '┐', '┘', '─', '│'];

pub fn get_jingju_chat_logo() -> String {
    use owo_colors::OwoColorize;

    // vermilion to gold
    let gradient_start = (0xB2, 0x1F, 0x1F);
    let gradient_end = (0xF2, 0xB7, 0x05);
    let shadow_color = (0x7A, 0x2E, 0x1C);

    let mut result = String::new();

    for line in JINGJU_CHAT_LOGO.iter() {
        let line_length = line.chars().filter(|c| *c == '█').count();
        let mut main_char_index = 0;

        for ch in line.chars() {
            if ch == '█' {
                let position = if line_length > 1 {
                    main_char_index as f32 / (line_length - 1) as f32
                } else {
                    0.0
                };

                let lerp =
                    |from: u8, to: u8| (from as f32 + (to as f32 - from as f32) * position) as u8;
                let r = lerp(gradient_start.0, gradient_end.0);
                let g = lerp(gradient_start.1, gradient_end.1);
                let b = lerp(gradient_start.2, gradient_end.2);

                result.push_str(&format!("{}", ch.truecolor(r, g, b)));
                main_char_index += 1;
            } else if SHADOW_CHARS.contains(&ch) {
                result.push_str(&format!(
                    "{}",
                    ch.truecolor(shadow_color.0, shadow_color.1, shadow_color.2)
                ));
            } else {
                result.push(ch);
            }
        }
        result.push('\n');
    }

    result
}
