// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker option record and CLI arg builder.
//!
//! Options are declared as an explicit, optional-field record (not a
//! generic key/value map) so the builder can iterate in a fixed
//! declaration order, guaranteeing a stable flag order for test goldens.
//! Two fields — `cuda_device` and `enable_mps` — never become CLI
//! flags; they only drive environment derivation and device-selector
//! attribution.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerOptions {
    // --- network ---
    pub port: Option<u16>,
    pub listen: Option<String>,
    pub tls_keyfile: Option<String>,
    pub tls_certfile: Option<String>,

    // --- directories ---
    pub output_directory: Option<String>,
    pub input_directory: Option<String>,
    pub extra_model_paths_config: Option<Vec<String>>,

    // --- behavior toggles ---
    pub auto_launch: Option<bool>,
    pub disable_metadata: Option<bool>,

    // --- hardware selection / VRAM modes ---
    pub cpu: Option<bool>,
    pub lowvram: Option<bool>,
    pub novram: Option<bool>,
    pub highvram: Option<bool>,

    // --- precision selectors ---
    pub unet_precision: Option<String>,
    pub vae_precision: Option<String>,
    pub text_encoder_precision: Option<String>,

    // --- attention mechanism ---
    pub attention: Option<String>,

    // --- preview options ---
    pub preview_method: Option<String>,
    pub preview_size: Option<u32>,

    // --- cache options ---
    pub cache_classic: Option<bool>,
    pub cache_lru: Option<u32>,

    // --- the multi-valued `fast` flag: single repeated flag, values follow ---
    pub fast: Option<Vec<String>>,

    // --- verbosity ---
    pub verbose: Option<String>,

    // --- internal-only: never emitted as a CLI flag ---
    /// CUDA device index; drives `CUDA_VISIBLE_DEVICES` and device-selector
    /// attribution.
    pub cuda_device: Option<u32>,
    /// Metal enable flag; drives `PYTORCH_ENABLE_MPS_FALLBACK` on macOS.
    pub enable_mps: Option<bool>,
}

impl WorkerOptions {
    /// Build the worker's CLI argv (excluding `main.py` itself):
    /// - scalar options: `--<kebab-case key> <value>`
    /// - `true` booleans: the flag alone
    /// - `false` booleans: omitted entirely
    /// - the `fast` array: one flag, all values follow
    /// - every other array: the flag repeated once per element
    /// - `cuda_device` / `enable_mps`: never emitted
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        macro_rules! scalar {
            ($field:expr, $flag:expr) => {
                if let Some(ref v) = $field {
                    args.push($flag.to_string());
                    args.push(v.to_string());
                }
            };
        }
        macro_rules! flag_bool {
            ($field:expr, $flag:expr) => {
                if let Some(true) = $field {
                    args.push($flag.to_string());
                }
            };
        }

        scalar!(self.port, "--port");
        scalar!(self.listen, "--listen");
        scalar!(self.tls_keyfile, "--tls-keyfile");
        scalar!(self.tls_certfile, "--tls-certfile");

        scalar!(self.output_directory, "--output-directory");
        scalar!(self.input_directory, "--input-directory");
        if let Some(ref values) = self.extra_model_paths_config {
            for v in values {
                args.push("--extra-model-paths-config".to_string());
                args.push(v.clone());
            }
        }

        flag_bool!(self.auto_launch, "--auto-launch");
        flag_bool!(self.disable_metadata, "--disable-metadata");

        flag_bool!(self.cpu, "--cpu");
        flag_bool!(self.lowvram, "--lowvram");
        flag_bool!(self.novram, "--novram");
        flag_bool!(self.highvram, "--highvram");

        scalar!(self.unet_precision, "--unet-precision");
        scalar!(self.vae_precision, "--vae-precision");
        scalar!(self.text_encoder_precision, "--text-encoder-precision");

        scalar!(self.attention, "--attention");

        scalar!(self.preview_method, "--preview-method");
        scalar!(self.preview_size, "--preview-size");

        flag_bool!(self.cache_classic, "--cache-classic");
        scalar!(self.cache_lru, "--cache-lru");

        if let Some(ref values) = self.fast {
            if !values.is_empty() {
                args.push("--fast".to_string());
                args.extend(values.iter().cloned());
            }
        }

        scalar!(self.verbose, "--verbose");

        args
    }

    /// Inverse of `build_args`: read back `--flag value` pairs (and bare
    /// boolean flags) into an option record. Unknown flags are ignored
    /// rather than erroring, since unrecognized flags are forwarded
    /// verbatim and a parser built for round-trip testing of *known*
    /// flags does not need to reject the ones it only meets when
    /// reading back its own output.
    pub fn parse_args(args: &[String]) -> Self {
        let mut opts = WorkerOptions::default();
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            i += 1;
            match flag {
                "--port" => {
                    opts.port = args.get(i).and_then(|v| v.parse().ok());
                    i += 1;
                }
                "--listen" => {
                    opts.listen = args.get(i).cloned();
                    i += 1;
                }
                "--tls-keyfile" => {
                    opts.tls_keyfile = args.get(i).cloned();
                    i += 1;
                }
                "--tls-certfile" => {
                    opts.tls_certfile = args.get(i).cloned();
                    i += 1;
                }
                "--output-directory" => {
                    opts.output_directory = args.get(i).cloned();
                    i += 1;
                }
                "--input-directory" => {
                    opts.input_directory = args.get(i).cloned();
                    i += 1;
                }
                "--extra-model-paths-config" => {
                    let value = args.get(i).cloned();
                    i += 1;
                    if let Some(v) = value {
                        opts.extra_model_paths_config
                            .get_or_insert_with(Vec::new)
                            .push(v);
                    }
                }
                "--auto-launch" => opts.auto_launch = Some(true),
                "--disable-metadata" => opts.disable_metadata = Some(true),
                "--cpu" => opts.cpu = Some(true),
                "--lowvram" => opts.lowvram = Some(true),
                "--novram" => opts.novram = Some(true),
                "--highvram" => opts.highvram = Some(true),
                "--unet-precision" => {
                    opts.unet_precision = args.get(i).cloned();
                    i += 1;
                }
                "--vae-precision" => {
                    opts.vae_precision = args.get(i).cloned();
                    i += 1;
                }
                "--text-encoder-precision" => {
                    opts.text_encoder_precision = args.get(i).cloned();
                    i += 1;
                }
                "--attention" => {
                    opts.attention = args.get(i).cloned();
                    i += 1;
                }
                "--preview-method" => {
                    opts.preview_method = args.get(i).cloned();
                    i += 1;
                }
                "--preview-size" => {
                    opts.preview_size = args.get(i).and_then(|v| v.parse().ok());
                    i += 1;
                }
                "--cache-classic" => opts.cache_classic = Some(true),
                "--cache-lru" => {
                    opts.cache_lru = args.get(i).and_then(|v| v.parse().ok());
                    i += 1;
                }
                "--fast" => {
                    let mut values = Vec::new();
                    while let Some(v) = args.get(i) {
                        if v.starts_with("--") {
                            break;
                        }
                        values.push(v.clone());
                        i += 1;
                    }
                    opts.fast = Some(values);
                }
                "--verbose" => {
                    opts.verbose = args.get(i).cloned();
                    i += 1;
                }
                _ => {
                    // Unknown flag: skip a following value if it doesn't
                    // itself look like a flag, otherwise treat it as boolean.
                    if let Some(v) = args.get(i) {
                        if !v.starts_with("--") {
                            i += 1;
                        }
                    }
                }
            }
        }
        opts
    }

    /// Device selector string attributed to the worker record: the CUDA
    /// index if set, else "mps" if Metal was requested, else "cpu".
    pub fn device_selector(&self) -> String {
        if let Some(index) = self.cuda_device {
            index.to_string()
        } else if self.enable_mps == Some(true) {
            "mps".to_string()
        } else {
            "cpu".to_string()
        }
    }

    /// Environment variables to set on the child process.
    #[cfg(target_os = "linux")]
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.cuda_env()
    }

    #[cfg(target_os = "windows")]
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.cuda_env()
    }

    #[cfg(target_os = "macos")]
    pub fn env_vars(&self) -> Vec<(String, String)> {
        if self.enable_mps == Some(true) {
            vec![("PYTORCH_ENABLE_MPS_FALLBACK".to_string(), "1".to_string())]
        } else {
            Vec::new()
        }
    }

    #[cfg(any(target_os = "linux", target_os = "windows"))]
    fn cuda_env(&self) -> Vec<(String, String)> {
        match self.cuda_device {
            Some(index) => vec![("CUDA_VISIBLE_DEVICES".to_string(), index.to_string())],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_case_round_trip_excludes_internal_options() {
        let mut opts = WorkerOptions::default();
        opts.port = Some(8188);
        opts.cpu = Some(true);
        opts.lowvram = Some(false); // omitted
        opts.attention = Some("split".to_string());
        opts.cuda_device = Some(0); // never emitted
        opts.enable_mps = Some(true); // never emitted

        let args = opts.build_args();
        assert!(args.contains(&"--port".to_string()));
        assert!(args.contains(&"--cpu".to_string()));
        assert!(!args.iter().any(|a| a == "--lowvram"));
        assert!(!args.iter().any(|a| a.contains("cuda")));
        assert!(!args.iter().any(|a| a.contains("mps")));

        let parsed = WorkerOptions::parse_args(&args);
        assert_eq!(parsed.port, opts.port);
        assert_eq!(parsed.cpu, opts.cpu);
        assert_eq!(parsed.attention, opts.attention);
        // lowvram=false is indistinguishable from "unset" after a round
        // trip, by construction: `false` is never serialized.
        assert_eq!(parsed.lowvram, None);
    }

    #[test]
    fn fast_flag_serializes_as_a_single_repeated_flag() {
        let mut opts = WorkerOptions::default();
        opts.fast = Some(vec!["a".to_string(), "b".to_string()]);
        let args = opts.build_args();
        assert_eq!(args, vec!["--fast", "a", "b"]);
    }

    #[test]
    fn other_array_flags_repeat_the_flag_per_element() {
        let mut opts = WorkerOptions::default();
        opts.extra_model_paths_config = Some(vec!["a".to_string(), "b".to_string()]);
        let args = opts.build_args();
        assert_eq!(
            args,
            vec![
                "--extra-model-paths-config",
                "a",
                "--extra-model-paths-config",
                "b",
            ]
        );
    }

    #[test]
    fn device_selector_prefers_cuda_over_mps_over_cpu() {
        let mut opts = WorkerOptions::default();
        assert_eq!(opts.device_selector(), "cpu");
        opts.enable_mps = Some(true);
        assert_eq!(opts.device_selector(), "mps");
        opts.cuda_device = Some(2);
        assert_eq!(opts.device_selector(), "2");
    }
}
