//! Tool arguments and the Easy Diffusion render payload.
//!
//! This module turns `generate_image` arguments into a validated
//! [`GenerationInput`] and then into the [`RenderRequest`] posted to the
//! backend. Model-family adjustments are expressed as an ordered list of pure
//! rules, each mapping a model identifier to a [`PayloadPatch`].

use edmcp_common::config::Config;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Negative prompt used when the caller supplies none.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "worst quality, low quality, low score";

/// Default image width in pixels.
pub const DEFAULT_WIDTH: u32 = 1280;

/// Default image height in pixels.
pub const DEFAULT_HEIGHT: u32 = 960;

/// Default number of inference steps.
pub const DEFAULT_INFERENCE_STEPS: u32 = 25;

/// Default and maximum guidance scale.
pub const MAX_GUIDANCE_SCALE: f64 = 7.5;

/// Seed value meaning "let the backend pick".
pub const RANDOM_SEED: i64 = -1;

/// Default sampler.
pub const DEFAULT_SAMPLER: &str = "deis";

/// Step ceiling for fast-sampling models.
pub const FAST_SAMPLING_MAX_STEPS: u32 = 12;

/// Markers of SDXL anime derivatives that expect clip skip.
pub const ANIME_MARKERS: &[&str] = &["animagine", "pony", "illustrious"];

/// Markers of distilled models that need few steps.
pub const FAST_SAMPLING_MARKERS: &[&str] = &["flash", "turbo", "schnell", "lightning"];

/// Marker of the Flux family.
pub const FLUX_MARKER: &str = "flux";

/// Marker of the Chroma family.
pub const CHROMA_MARKER: &str = "chroma";

const FAMILY_VAE: &str = "ae";
const FLUX_TEXT_ENCODER: &str = "['clip_l', 't5xxl_fp16']";
const CHROMA_TEXT_ENCODER: &str = "t5xxl_fp16";

/// Short model names and the concrete backend model they stand for.
pub const MODEL_ALIASES: &[(&str, &str)] = &[
    ("anime", "animagineXL_v4Opt"),
    ("sdxl", "sd_xl_base_1.0_0.9vae"),
    ("sd", "sd-v1-5"),
    ("flux", "flux1-dev-bnb-nf4-v2"),
    ("chroma", "Chroma1-HD-Q6_K"),
];

/// Arguments of the `generate_image` tool.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct GenerateImageArgs {
    /// Text description of the image to generate.
    pub prompt: String,

    /// What to avoid in the image. Defaults to "worst quality, low quality,
    /// low score"; use "none" to send no negative prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,

    /// Image width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Image height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,

    /// Number of images to generate.
    #[serde(default = "default_num_outputs")]
    pub num_outputs: u32,

    /// Number of inference steps.
    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: u32,

    /// Guidance scale for prompt adherence.
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,

    /// Random seed (-1 for random).
    #[serde(default = "default_seed")]
    pub seed: i64,

    /// Sampler algorithm.
    #[serde(default = "default_sampler")]
    pub sampler_name: String,

    /// Model to use - a family name (such as sdxl or flux) or a specific
    /// model (such as animagineXL40_v4Opt).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_stable_diffusion_model: Option<String>,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_num_outputs() -> u32 {
    1
}

fn default_inference_steps() -> u32 {
    DEFAULT_INFERENCE_STEPS
}

fn default_guidance_scale() -> f64 {
    MAX_GUIDANCE_SCALE
}

fn default_seed() -> i64 {
    RANDOM_SEED
}

fn default_sampler() -> String {
    DEFAULT_SAMPLER.to_string()
}

impl GenerateImageArgs {
    /// Arguments with only a prompt set; everything else takes its default.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            num_outputs: default_num_outputs(),
            num_inference_steps: DEFAULT_INFERENCE_STEPS,
            guidance_scale: MAX_GUIDANCE_SCALE,
            seed: RANDOM_SEED,
            sampler_name: default_sampler(),
            use_stable_diffusion_model: None,
        }
    }
}

/// Validation error details for tool arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validated, defaulted input for one generation. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationInput {
    pub prompt: String,
    /// Never empty here; "none" is only turned into "" by the builder.
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_outputs: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f64,
    pub seed: i64,
    pub sampler_name: String,
    pub model: String,
}

impl GenerationInput {
    /// Validate tool arguments and fill in defaults from `config`.
    ///
    /// # Returns
    /// - `Ok(GenerationInput)` if all arguments are valid
    /// - `Err(Vec<ValidationError>)` with every validation error
    pub fn from_args(
        args: GenerateImageArgs,
        config: &Config,
    ) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();

        if args.prompt.trim().is_empty() {
            errors.push(ValidationError {
                field: "prompt".to_string(),
                message: "Prompt cannot be empty".to_string(),
            });
        }

        if args.width == 0 || args.height == 0 {
            errors.push(ValidationError {
                field: "width/height".to_string(),
                message: format!(
                    "Image dimensions must be positive, got {}x{}",
                    args.width, args.height
                ),
            });
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let negative_prompt = args
            .negative_prompt
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_NEGATIVE_PROMPT.to_string());

        let model = args
            .use_stable_diffusion_model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| config.default_model.clone());

        Ok(Self {
            prompt: args.prompt,
            negative_prompt,
            width: args.width,
            height: args.height,
            num_outputs: args.num_outputs.max(1),
            num_inference_steps: args.num_inference_steps,
            guidance_scale: args.guidance_scale,
            seed: args.seed,
            sampler_name: args.sampler_name,
            model,
        })
    }
}

/// Job payload for `POST /render`. Fields serialize in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_outputs: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f64,
    pub seed: i64,
    pub used_random_seed: bool,
    pub sampler_name: String,
    pub scheduler_name: &'static str,
    pub use_stable_diffusion_model: String,
    pub use_vae_model: String,
    pub clip_skip: bool,
    pub enable_vae_tiling: bool,
    pub vram_usage_level: &'static str,
    pub output_format: &'static str,
    pub output_quality: u32,
    pub output_lossless: bool,
    pub stream_progress_updates: bool,
    pub stream_image_progress: bool,
    pub show_only_filtered_image: bool,
    pub block_nsfw: bool,
    pub metadata_output_format: &'static str,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_text_encoder_model: Option<String>,
}

/// Field overrides produced by a family rule. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadPatch {
    pub clip_skip: Option<bool>,
    /// Upper bound on inference steps.
    pub max_inference_steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub vae_model: Option<&'static str>,
    pub text_encoder_model: Option<&'static str>,
}

impl PayloadPatch {
    /// True when the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the overrides to a payload.
    pub fn apply(&self, request: &mut RenderRequest) {
        if let Some(clip_skip) = self.clip_skip {
            request.clip_skip = clip_skip;
        }
        if let Some(max_steps) = self.max_inference_steps {
            request.num_inference_steps = request.num_inference_steps.min(max_steps);
        }
        if let Some(guidance) = self.guidance_scale {
            request.guidance_scale = guidance;
        }
        if let Some(vae) = self.vae_model {
            request.use_vae_model = vae.to_string();
        }
        if let Some(encoder) = self.text_encoder_model {
            request.use_text_encoder_model = Some(encoder.to_string());
        }
    }
}

/// A model-family rule.
pub type FamilyRule = fn(&str) -> PayloadPatch;

/// Family rules in application order. Later rules win on conflicting fields.
pub const FAMILY_RULES: &[(&str, FamilyRule)] = &[
    ("anime", anime_rule),
    ("fast_sampling", fast_sampling_rule),
    ("flux", flux_rule),
    ("chroma", chroma_rule),
];

fn contains_any(model: &str, markers: &[&str]) -> bool {
    let model = model.to_lowercase();
    markers.iter().any(|marker| model.contains(marker))
}

/// SDXL anime derivatives get clip skip.
pub fn anime_rule(model: &str) -> PayloadPatch {
    if !contains_any(model, ANIME_MARKERS) {
        return PayloadPatch::default();
    }
    PayloadPatch {
        clip_skip: Some(true),
        ..Default::default()
    }
}

/// Fast-sampling models cap inference steps.
pub fn fast_sampling_rule(model: &str) -> PayloadPatch {
    if !contains_any(model, FAST_SAMPLING_MARKERS) {
        return PayloadPatch::default();
    }
    PayloadPatch {
        max_inference_steps: Some(FAST_SAMPLING_MAX_STEPS),
        ..Default::default()
    }
}

/// Flux models need the `ae` VAE, both text encoders and guidance 1.
pub fn flux_rule(model: &str) -> PayloadPatch {
    if !contains_any(model, &[FLUX_MARKER]) {
        return PayloadPatch::default();
    }
    PayloadPatch {
        guidance_scale: Some(1.0),
        vae_model: Some(FAMILY_VAE),
        text_encoder_model: Some(FLUX_TEXT_ENCODER),
        ..Default::default()
    }
}

/// Chroma models need the `ae` VAE and the T5 encoder. Guidance is 1 for
/// fast-sampling variants and 4 otherwise.
pub fn chroma_rule(model: &str) -> PayloadPatch {
    if !contains_any(model, &[CHROMA_MARKER]) {
        return PayloadPatch::default();
    }
    let guidance = if contains_any(model, FAST_SAMPLING_MARKERS) {
        1.0
    } else {
        4.0
    };
    PayloadPatch {
        guidance_scale: Some(guidance),
        vae_model: Some(FAMILY_VAE),
        text_encoder_model: Some(CHROMA_TEXT_ENCODER),
        ..Default::default()
    }
}

/// Map a short family name to its concrete model. Other identifiers pass
/// through unchanged.
pub fn resolve_model_alias(model: &str) -> &str {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(model))
        .map(|(_, concrete)| *concrete)
        .unwrap_or(model)
}

/// Builds the backend payload for a generation. Pure: no I/O, no clock.
pub struct GenerationRequestBuilder;

impl GenerationRequestBuilder {
    /// Build the render payload for `input`, tagged with `session_id`.
    pub fn build(input: &GenerationInput, session_id: impl Into<String>) -> RenderRequest {
        let negative_prompt = if input.negative_prompt.trim().is_empty()
            || input.negative_prompt == "none"
        {
            String::new()
        } else {
            input.negative_prompt.clone()
        };

        let random_seed = input.seed == RANDOM_SEED;

        let mut request = RenderRequest {
            prompt: input.prompt.clone(),
            negative_prompt,
            width: input.width,
            height: input.height,
            num_outputs: input.num_outputs,
            num_inference_steps: input.num_inference_steps,
            guidance_scale: input.guidance_scale.min(MAX_GUIDANCE_SCALE),
            seed: if random_seed { 1 } else { input.seed },
            used_random_seed: random_seed,
            sampler_name: input.sampler_name.clone(),
            scheduler_name: "simple",
            use_stable_diffusion_model: input.model.clone(),
            use_vae_model: String::new(),
            clip_skip: false,
            enable_vae_tiling: true,
            vram_usage_level: "low",
            output_format: "png",
            output_quality: 75,
            output_lossless: false,
            stream_progress_updates: true,
            stream_image_progress: false,
            show_only_filtered_image: true,
            block_nsfw: false,
            metadata_output_format: "none",
            session_id: session_id.into(),
            use_text_encoder_model: None,
        };

        for (_, rule) in FAMILY_RULES {
            rule(&input.model).apply(&mut request);
        }

        request.use_stable_diffusion_model = resolve_model_alias(&input.model).to_string();
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(model: &str) -> GenerationInput {
        let config = Config {
            default_model: model.to_string(),
            ..Config::default()
        };
        GenerationInput::from_args(GenerateImageArgs::from_prompt("a red fox"), &config).unwrap()
    }

    #[test]
    fn test_args_defaults_from_json() {
        let args: GenerateImageArgs = serde_json::from_value(json!({"prompt": "cat"})).unwrap();
        assert_eq!(args.width, 1280);
        assert_eq!(args.height, 960);
        assert_eq!(args.num_outputs, 1);
        assert_eq!(args.num_inference_steps, 25);
        assert_eq!(args.guidance_scale, 7.5);
        assert_eq!(args.seed, -1);
        assert_eq!(args.sampler_name, "deis");
        assert!(args.negative_prompt.is_none());
        assert!(args.use_stable_diffusion_model.is_none());
    }

    #[test]
    fn test_args_reject_wrong_types() {
        let result = serde_json::from_value::<GenerateImageArgs>(json!({"prompt": "cat", "width": "wide"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_prompt_fails_validation() {
        let errors =
            GenerationInput::from_args(GenerateImageArgs::from_prompt("   "), &Config::default())
                .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "prompt: Prompt cannot be empty");
    }

    #[test]
    fn test_zero_dimensions_fail_validation() {
        let mut args = GenerateImageArgs::from_prompt("cat");
        args.width = 0;
        let errors = GenerationInput::from_args(args, &Config::default()).unwrap_err();
        assert_eq!(errors[0].field, "width/height");
    }

    #[test]
    fn test_missing_negative_prompt_gets_default() {
        let input = input("sd-v1-5");
        assert_eq!(input.negative_prompt, DEFAULT_NEGATIVE_PROMPT);
    }

    #[test]
    fn test_model_defaults_from_config() {
        let input = input("myModel");
        assert_eq!(input.model, "myModel");

        let mut args = GenerateImageArgs::from_prompt("cat");
        args.use_stable_diffusion_model = Some("  ".to_string());
        let input = GenerationInput::from_args(args, &Config::default()).unwrap();
        assert_eq!(input.model, edmcp_common::config::DEFAULT_MODEL);
    }

    #[test]
    fn test_random_seed_is_flagged() {
        let request = GenerationRequestBuilder::build(&input("sd-v1-5"), "s1");
        assert_eq!(request.seed, 1);
        assert!(request.used_random_seed);

        let mut fixed = input("sd-v1-5");
        fixed.seed = 42;
        let request = GenerationRequestBuilder::build(&fixed, "s1");
        assert_eq!(request.seed, 42);
        assert!(!request.used_random_seed);
    }

    #[test]
    fn test_base_payload_constants() {
        let request = GenerationRequestBuilder::build(&input("sd-v1-5"), "session-1");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["scheduler_name"], "simple");
        assert_eq!(value["use_vae_model"], "");
        assert_eq!(value["clip_skip"], false);
        assert_eq!(value["enable_vae_tiling"], true);
        assert_eq!(value["vram_usage_level"], "low");
        assert_eq!(value["output_format"], "png");
        assert_eq!(value["output_quality"], 75);
        assert_eq!(value["metadata_output_format"], "none");
        assert_eq!(value["session_id"], "session-1");
        assert!(value.get("use_text_encoder_model").is_none());
    }

    #[test]
    fn test_payload_field_order() {
        let request = GenerationRequestBuilder::build(&input("sd-v1-5"), "s");
        let text = serde_json::to_string(&request).unwrap();
        let prompt = text.find("\"prompt\"").unwrap();
        let seed = text.find("\"seed\"").unwrap();
        let session = text.find("\"session_id\"").unwrap();
        assert!(prompt < seed && seed < session);
    }

    #[test]
    fn test_anime_rule_sets_clip_skip() {
        let request = GenerationRequestBuilder::build(&input("animagineXL40_v4Opt"), "s");
        assert!(request.clip_skip);
        assert!(anime_rule("PonyDiffusionV6").clip_skip.is_some());
        assert!(anime_rule("sd-v1-5").is_empty());
    }

    #[test]
    fn test_fast_sampling_rule_caps_steps() {
        let request = GenerationRequestBuilder::build(&input("sdxl_lightning_4step"), "s");
        assert_eq!(request.num_inference_steps, 12);

        let mut few = input("dreamshaper_turbo");
        few.num_inference_steps = 8;
        assert_eq!(GenerationRequestBuilder::build(&few, "s").num_inference_steps, 8);
    }

    #[test]
    fn test_flux_rule() {
        let request = GenerationRequestBuilder::build(&input("flux1-schnell"), "s");
        assert_eq!(request.guidance_scale, 1.0);
        assert_eq!(request.use_vae_model, "ae");
        assert_eq!(
            request.use_text_encoder_model.as_deref(),
            Some("['clip_l', 't5xxl_fp16']")
        );
        assert_eq!(request.num_inference_steps, 12);
    }

    #[test]
    fn test_chroma_rule_guidance_depends_on_fast_marker() {
        let request = GenerationRequestBuilder::build(&input("Chroma1-HD-Q6_K"), "s");
        assert_eq!(request.guidance_scale, 4.0);
        assert_eq!(request.use_vae_model, "ae");
        assert_eq!(request.use_text_encoder_model.as_deref(), Some("t5xxl_fp16"));

        let request = GenerationRequestBuilder::build(&input("chroma-flash"), "s");
        assert_eq!(request.guidance_scale, 1.0);
    }

    #[test]
    fn test_later_rule_wins_when_families_overlap() {
        let request = GenerationRequestBuilder::build(&input("flux-chroma-mix"), "s");
        assert_eq!(request.guidance_scale, 4.0);
        assert_eq!(request.use_text_encoder_model.as_deref(), Some("t5xxl_fp16"));
    }

    #[test]
    fn test_aliases_resolve_case_insensitively() {
        assert_eq!(resolve_model_alias("anime"), "animagineXL_v4Opt");
        assert_eq!(resolve_model_alias("SDXL"), "sd_xl_base_1.0_0.9vae");
        assert_eq!(resolve_model_alias("sd"), "sd-v1-5");
        assert_eq!(resolve_model_alias("Flux"), "flux1-dev-bnb-nf4-v2");
        assert_eq!(resolve_model_alias("chroma"), "Chroma1-HD-Q6_K");
        assert_eq!(resolve_model_alias("sd-v1-5"), "sd-v1-5");
    }

    #[test]
    fn test_alias_resolution_happens_after_rules() {
        let request = GenerationRequestBuilder::build(&input("flux"), "s");
        assert_eq!(request.use_stable_diffusion_model, "flux1-dev-bnb-nf4-v2");
        assert_eq!(request.use_vae_model, "ae");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError {
            field: "prompt".to_string(),
            message: "Prompt cannot be empty".to_string(),
        };
        assert_eq!(err.to_string(), "prompt: Prompt cannot be empty");
    }
}
