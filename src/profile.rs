//! Profiles: named setting bundles applied when a matching window gains
//! focus.

use serde::{Deserialize, Serialize};

use crate::constants::config::DEFAULT_PROFILE;
use crate::vcp::ColorValue;
use crate::window::WindowInfo;

/// Window match criteria. Empty criteria match nothing, except on the
/// reserved default profile which matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileMatch {
    /// Globs matched against class, instance or title.
    pub window_class: Vec<String>,
    /// Globs matched against the title only.
    pub window_title: Vec<String>,
}

impl ProfileMatch {
    pub fn is_empty(&self) -> bool {
        self.window_class.is_empty() && self.window_title.is_empty()
    }

    pub fn matches(&self, window: &WindowInfo) -> bool {
        self.window_class
            .iter()
            .any(|p| window.matches_class_pattern(p))
            || self
                .window_title
                .iter()
                .any(|p| window.matches_title_pattern(p))
    }
}

/// Hardware settings carried by a profile. All optional; unset features are
/// left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    pub color: Option<ColorValue>,
    pub brightness: Option<u16>,
    pub contrast: Option<u16>,
    pub red_gain: Option<u16>,
    pub green_gain: Option<u16>,
    pub blue_gain: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    /// Higher wins; the default profile is forced to the bottom at load.
    pub priority: i32,
    #[serde(rename = "match")]
    pub matching: ProfileMatch,
    pub settings: ProfileSettings,
    /// Only match while the window is fullscreen.
    pub require_fullscreen: bool,
    /// Overrides for the adaptive loops while this profile is active;
    /// `None` leaves the current setting untouched.
    pub auto_brightness: Option<bool>,
    pub auto_contrast: Option<bool>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: String::new(),
            priority: 0,
            matching: ProfileMatch::default(),
            settings: ProfileSettings::default(),
            require_fullscreen: false,
            auto_brightness: None,
            auto_contrast: None,
        }
    }
}

impl Profile {
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_PROFILE
    }

    pub fn matches(&self, window: &WindowInfo) -> bool {
        if self.require_fullscreen && !window.is_fullscreen {
            return false;
        }
        if self.is_default() {
            return true;
        }
        self.matching.matches(window)
    }
}

/// Sorts profiles for matching: priority descending, declaration order as
/// tie-break (stable sort), with the default profile forced last.
pub fn sort_for_matching(profiles: &mut [Profile]) {
    for p in profiles.iter_mut() {
        if p.is_default() {
            p.priority = i32::MIN;
        }
    }
    profiles.sort_by(|a, b| b.priority.cmp(&a.priority));
}

/// First profile in a sorted slice that matches the window.
pub fn find_matching<'a>(profiles: &'a [Profile], window: &WindowInfo) -> Option<&'a Profile> {
    profiles.iter().find(|p| p.matches(window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    fn window(class: &str, title: &str, fullscreen: bool) -> WindowInfo {
        WindowInfo {
            window: 7,
            title: title.to_string(),
            class: class.to_string(),
            instance: class.to_lowercase(),
            is_fullscreen: fullscreen,
            is_maximized: false,
            geometry: Some(Rect::new(0, 0, 800, 600)),
        }
    }

    fn profile(name: &str, priority: i32, classes: &[&str]) -> Profile {
        Profile {
            name: name.to_string(),
            priority,
            matching: ProfileMatch {
                window_class: classes.iter().map(|s| s.to_string()).collect(),
                window_title: Vec::new(),
            },
            ..Profile::default()
        }
    }

    #[test]
    fn higher_priority_wins() {
        let mut profiles = vec![
            profile("gaming", 10, &["steam*"]),
            profile("work", 50, &["steam*", "code"]),
        ];
        sort_for_matching(&mut profiles);
        let m = find_matching(&profiles, &window("steam", "Steam", false)).unwrap();
        assert_eq!(m.name, "work");
    }

    #[test]
    fn equal_priority_keeps_declaration_order() {
        let mut profiles = vec![
            profile("first", 10, &["app"]),
            profile("second", 10, &["app"]),
        ];
        sort_for_matching(&mut profiles);
        let m = find_matching(&profiles, &window("app", "App", false)).unwrap();
        assert_eq!(m.name, "first");
    }

    #[test]
    fn default_profile_is_always_last() {
        let mut profiles = vec![
            profile("default", 999, &[]),
            profile("video", 1, &["mpv"]),
        ];
        sort_for_matching(&mut profiles);
        let m = find_matching(&profiles, &window("mpv", "movie", false)).unwrap();
        assert_eq!(m.name, "video");
        // Anything else falls through to default.
        let m = find_matching(&profiles, &window("xterm", "shell", false)).unwrap();
        assert_eq!(m.name, "default");
    }

    #[test]
    fn fullscreen_requirement_gates_match() {
        let mut p = profile("video", 10, &["mpv"]);
        p.require_fullscreen = true;
        assert!(!p.matches(&window("mpv", "movie", false)));
        assert!(p.matches(&window("mpv", "movie", true)));
    }

    #[test]
    fn empty_match_on_non_default_never_matches() {
        let p = profile("empty", 10, &[]);
        assert!(!p.matches(&window("anything", "title", false)));
    }

    #[test]
    fn title_patterns_do_not_look_at_class() {
        let p = Profile {
            name: "movies".into(),
            matching: ProfileMatch {
                window_class: Vec::new(),
                window_title: vec!["*.mkv*".into()],
            },
            ..Profile::default()
        };
        assert!(p.matches(&window("mpv", "show.mkv - mpv", false)));
        assert!(!p.matches(&window("file.mkv", "player", false)));
    }
}
