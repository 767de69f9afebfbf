//! Keyword classifier that tags an answer with a gesture for avatar channels.

use serde::{Deserialize, Serialize};

use askdesk_core::text::normalize_question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureTag {
    Greeting,
    Farewell,
    Thanking,
    Apologizing,
    Pointing,
    Explaining,
    Neutral,
}

/// Ordered: the first rule with a matching keyword wins.
const RULES: &[(GestureTag, &[&str])] = &[
    (
        GestureTag::Apologizing,
        &["sorry", "apolog", "unfortunately", "siento", "disculp", "lamentablemente", "perdon"],
    ),
    (
        GestureTag::Greeting,
        &["hello", "hi", "welcome", "hola", "bienvenid", "buenos dias", "buenas tardes", "good morning"],
    ),
    (GestureTag::Farewell, &["goodbye", "bye", "adios", "hasta luego", "see you"]),
    (GestureTag::Thanking, &["thank", "gracias"]),
    (
        GestureTag::Pointing,
        &[
            "located", "building", "room", "floor", "left", "right", "entrance", "ubicad", "edificio",
            "aula", "piso", "izquierda", "derecha", "entrada",
        ],
    ),
    (
        GestureTag::Explaining,
        &["first", "step", "steps", "then", "primero", "paso", "pasos", "luego", "requisitos", "requirements"],
    ),
];

/// Answers longer than this many words read as an explanation when no rule matched.
const LONG_ANSWER_WORDS: usize = 40;

pub fn classify(answer: &str) -> GestureTag {
    let normalized = normalize_question(answer);
    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    let padded = format!(" {normalized} ");

    for (tag, keywords) in RULES {
        let hit = keywords.iter().any(|kw| {
            if kw.contains(' ') {
                padded.contains(&format!(" {kw} "))
            } else if kw.len() <= 3 {
                words.iter().any(|w| w == kw)
            } else {
                words.iter().any(|w| w.starts_with(kw))
            }
        });
        if hit {
            return *tag;
        }
    }

    if words.len() > LONG_ANSWER_WORDS {
        GestureTag::Explaining
    } else {
        GestureTag::Neutral
    }
}
