//! Channel-name templates.
//!
//! Supported tokens:
//! - `@user`: display name of the member who joined the trigger
//! - `@position`: 1-based number of the channel within its category
//! - `@[a,b,c]`: one of the comma-separated options, picked at random
//!
//! Tokens are recognized in one left-to-right pass, so text coming from a
//! substitution (a display name containing `@position`, say) is never expanded.
//! The result is then censored against the guild blacklist and clamped to the
//! platform's name limit.

use rand::{seq::IndexedRandom, Rng};
use regex::RegexBuilder;

/// Platform limit for channel names, in characters.
pub const MAX_NAME_LEN: usize = 100;
const ELLIPSIS: &str = "...";
const MASK: &str = "*";

#[derive(Clone, Copy, Debug)]
pub struct RenderContext<'a> {
    pub user: &'a str,
    pub position: usize,
    pub blacklist: &'a [String],
}

pub fn render(template: &str, ctx: &RenderContext<'_>) -> String {
    render_with_rng(template, ctx, &mut rand::rng())
}

pub fn render_with_rng<R: Rng + ?Sized>(
    template: &str,
    ctx: &RenderContext<'_>,
    rng: &mut R,
) -> String {
    let name = substitute(template, ctx, rng);
    let name = censor(&name, ctx.blacklist);
    truncate(name)
}

fn substitute<R: Rng + ?Sized>(template: &str, ctx: &RenderContext<'_>, rng: &mut R) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]);
        let tail = &rest[at..];

        if let Some(after) = tail.strip_prefix("@user") {
            out.push_str(ctx.user);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("@position") {
            out.push_str(&ctx.position.to_string());
            rest = after;
        } else if let Some((options, after)) = bracket_group(tail) {
            let options: Vec<&str> = options.split(',').collect();
            if let Some(choice) = options.choose(rng) {
                out.push_str(choice);
            }
            rest = after;
        } else {
            out.push('@');
            rest = &tail[1..];
        }
    }

    out.push_str(rest);
    out
}

/// Split `@[...]rest` into the option list and `rest`. Empty or unterminated
/// groups are not groups.
fn bracket_group(tail: &str) -> Option<(&str, &str)> {
    let inner = tail.strip_prefix("@[")?;
    let end = inner.find(']')?;
    if end == 0 {
        return None;
    }
    Some((&inner[..end], &inner[end + 1..]))
}

/// Mask every case-insensitive occurrence of each blacklisted word.
pub fn censor(name: &str, blacklist: &[String]) -> String {
    let mut out = name.to_string();
    for word in blacklist {
        if word.is_empty() {
            continue;
        }
        let Ok(re) = RegexBuilder::new(&regex::escape(word))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };
        if re.is_match(&out) {
            out = re
                .replace_all(&out, |caps: &regex::Captures<'_>| {
                    MASK.repeat(caps[0].chars().count())
                })
                .into_owned();
        }
    }
    out
}

/// Clamp to [`MAX_NAME_LEN`] characters, marking the cut with an ellipsis.
pub fn truncate(name: String) -> String {
    if name.chars().count() <= MAX_NAME_LEN {
        return name;
    }
    let keep = MAX_NAME_LEN - ELLIPSIS.len();
    let mut out: String = name.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn ctx<'a>(user: &'a str, position: usize, blacklist: &'a [String]) -> RenderContext<'a> {
        RenderContext {
            user,
            position,
            blacklist,
        }
    }

    #[test]
    fn substitutes_user_and_position() {
        assert_eq!(render("@user's room", &ctx("Ann", 1, &[])), "Ann's room");
        assert_eq!(render("room @position", &ctx("Ann", 3, &[])), "room 3");
        assert_eq!(
            render("@user #@position (@user)", &ctx("Bo", 12, &[])),
            "Bo #12 (Bo)"
        );
    }

    #[test]
    fn plain_templates_render_unchanged() {
        assert_eq!(render("Lounge", &ctx("Ann", 1, &[])), "Lounge");
        assert_eq!(render("mail@home", &ctx("Ann", 1, &[])), "mail@home");
        assert_eq!(render("@", &ctx("Ann", 1, &[])), "@");
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        let out = render("@user's room", &ctx("@position @[x,y]", 5, &[]));
        assert_eq!(out, "@position @[x,y]'s room");
    }

    #[test]
    fn malformed_brackets_stay_verbatim() {
        assert_eq!(render("pick @[a,b", &ctx("Ann", 1, &[])), "pick @[a,b");
        assert_eq!(render("pick @[]", &ctx("Ann", 1, &[])), "pick @[]");
        assert_eq!(render("pick @ [a]", &ctx("Ann", 1, &[])), "pick @ [a]");
    }

    #[test]
    fn bracket_groups_pick_each_occurrence_independently() {
        let options = ["red", "green", "blue"];
        let mut seen = HashSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let out = render_with_rng("@[red,green,blue]-@[red,green,blue]", &ctx("A", 1, &[]), &mut rng);
            let (a, b) = out.split_once('-').unwrap();
            assert!(options.contains(&a), "unexpected pick {a}");
            assert!(options.contains(&b), "unexpected pick {b}");
            seen.insert((a.to_string(), b.to_string()));
        }
        // Independent picks produce mixed pairs, not only (x, x).
        assert!(seen.iter().any(|(a, b)| a != b));
    }

    #[test]
    fn bracket_options_are_used_verbatim() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = render_with_rng("@[ only ]", &ctx("A", 1, &[]), &mut rng);
        assert_eq!(out, " only ");
    }

    #[test]
    fn censors_case_insensitively_with_equal_length_mask() {
        let bl = vec!["heck".to_string()];
        assert_eq!(render("what the heck", &ctx("A", 1, &bl)), "what the ****");
        assert_eq!(
            render("HECK and Heck", &ctx("A", 1, &bl)),
            "**** and ****"
        );
    }

    #[test]
    fn censor_applies_to_substituted_names() {
        let bl = vec!["bad".to_string()];
        assert_eq!(render("@user's room", &ctx("BadGuy", 1, &bl)), "***Guy's room");
    }

    #[test]
    fn censor_treats_words_literally() {
        let bl = vec!["a.c".to_string(), String::new()];
        assert_eq!(censor("abc a.c", &bl), "abc ***");
    }

    #[test]
    fn long_names_are_truncated_to_limit() {
        let long = "x".repeat(130);
        let out = render(&long, &ctx("A", 1, &[]));
        assert_eq!(out.chars().count(), MAX_NAME_LEN);
        assert!(out.ends_with("..."));
        assert_eq!(&out[..97], &long[..97]);

        let exact = "y".repeat(100);
        assert_eq!(render(&exact, &ctx("A", 1, &[])), exact);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let long = "ä".repeat(120);
        let out = truncate(long);
        assert_eq!(out.chars().count(), MAX_NAME_LEN);
        assert!(out.starts_with("ää"));
    }
}
