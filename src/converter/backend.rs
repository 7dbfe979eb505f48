use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};
use crate::model::{OnnxModel, TensorInfo};
use crate::parser::OnnxModelLoader;

/// Inference backends, in no particular order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Backend {
    #[strum(to_string = "TensorRT", serialize = "TensorrtExecutionProvider")]
    #[serde(rename = "TensorRT")]
    TensorRt,
    #[strum(to_string = "CUDA", serialize = "CUDAExecutionProvider")]
    #[serde(rename = "CUDA")]
    Cuda,
    #[strum(to_string = "CPU", serialize = "CPUExecutionProvider")]
    #[serde(rename = "CPU")]
    Cpu,
}

impl Backend {
    /// ONNX Runtime execution provider identifier
    pub fn provider_name(&self) -> &'static str {
        match self {
            Backend::TensorRt => "TensorrtExecutionProvider",
            Backend::Cuda => "CUDAExecutionProvider",
            Backend::Cpu => "CPUExecutionProvider",
        }
    }
}

/// Which accelerators may be tried. CPU is always allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendPolicy {
    pub allow_tensorrt: bool,
    pub allow_cuda: bool,
}

impl Default for BackendPolicy {
    fn default() -> Self {
        Self {
            allow_tensorrt: true,
            allow_cuda: true,
        }
    }
}

/// An inference runtime able to build sessions over ONNX files
pub trait InferenceRuntime {
    type Session;

    /// Backends this installation advertises
    fn available_backends(&self) -> Vec<Backend>;

    /// Build a session that uses `backends` in order of preference
    fn create_session(&self, model_path: &Path, backends: &[Backend]) -> Result<Self::Session>;
}

/// Ordered preference list: TensorRT, then CUDA, then CPU. CPU is always last.
pub fn preference_order(available: &[Backend], policy: &BackendPolicy) -> Vec<Backend> {
    let mut order = Vec::with_capacity(3);

    if policy.allow_tensorrt && available.contains(&Backend::TensorRt) {
        order.push(Backend::TensorRt);
    }
    if policy.allow_cuda && available.contains(&Backend::Cuda) {
        order.push(Backend::Cuda);
    }
    order.push(Backend::Cpu);

    order
}

/// A session together with the backends serving it
#[derive(Debug)]
pub struct SessionSelection<S> {
    pub session: S,
    pub backends: Vec<Backend>,
}

/// Builds a session on the best available backend, falling back to CPU
pub struct BackendSelector<'a, R: InferenceRuntime> {
    runtime: &'a R,
    policy: BackendPolicy,
}

impl<'a, R: InferenceRuntime> BackendSelector<'a, R> {
    pub fn new(runtime: &'a R, policy: BackendPolicy) -> Self {
        Self { runtime, policy }
    }

    pub fn select(&self, model_path: &Path) -> Result<SessionSelection<R::Session>> {
        let preferred = preference_order(&self.runtime.available_backends(), &self.policy);
        debug!("Backend preference for {}: {:?}", model_path.display(), preferred);

        match self.runtime.create_session(model_path, &preferred) {
            Ok(session) => Ok(SessionSelection {
                session,
                backends: preferred,
            }),
            Err(e) => {
                warn!("Session creation with {:?} failed, retrying on CPU only: {}", preferred, e);

                let fallback = vec![Backend::Cpu];
                let session = self
                    .runtime
                    .create_session(model_path, &fallback)
                    .map_err(|e| Error::BackendError(format!("CPU fallback failed: {}", e)))?;

                Ok(SessionSelection {
                    session,
                    backends: fallback,
                })
            }
        }
    }
}

/// Runtime backed by this crate's own model loader. It only runs on CPU.
///
/// It can advertise extra backends to mimic an installation whose
/// accelerator providers are listed but fail to initialise.
#[derive(Debug, Clone)]
pub struct ReferenceRuntime {
    advertised: Vec<Backend>,
}

impl Default for ReferenceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceRuntime {
    pub fn new() -> Self {
        Self {
            advertised: vec![Backend::Cpu],
        }
    }

    pub fn with_advertised(advertised: Vec<Backend>) -> Self {
        Self { advertised }
    }
}

/// Session of the [`ReferenceRuntime`]
#[derive(Debug, Clone)]
pub struct ReferenceSession {
    model: OnnxModel,
    backend: Backend,
}

impl ReferenceSession {
    pub fn model(&self) -> &OnnxModel {
        &self.model
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn inputs(&self) -> Vec<TensorInfo> {
        OnnxModelLoader::get_input_info(&self.model)
    }

    pub fn outputs(&self) -> Vec<TensorInfo> {
        OnnxModelLoader::get_output_info(&self.model)
    }
}

impl InferenceRuntime for ReferenceRuntime {
    type Session = ReferenceSession;

    fn available_backends(&self) -> Vec<Backend> {
        self.advertised.clone()
    }

    fn create_session(&self, model_path: &Path, backends: &[Backend]) -> Result<ReferenceSession> {
        // Like ONNX Runtime, a listed provider that cannot start fails the whole session
        if let Some(unsupported) = backends.iter().find(|b| **b != Backend::Cpu) {
            return Err(Error::BackendError(format!(
                "{} failed to initialise",
                unsupported.provider_name()
            )));
        }
        if backends.is_empty() {
            return Err(Error::BackendError("no backend requested".to_string()));
        }

        let model = OnnxModelLoader::load_model(model_path)?;
        Ok(ReferenceSession {
            model,
            backend: Backend::Cpu,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::str::FromStr;

    #[test]
    fn test_preference_order() {
        let all = [Backend::Cpu, Backend::Cuda, Backend::TensorRt];
        assert_eq!(
            preference_order(&all, &BackendPolicy::default()),
            vec![Backend::TensorRt, Backend::Cuda, Backend::Cpu]
        );
        assert_eq!(
            preference_order(&[Backend::Cuda], &BackendPolicy::default()),
            vec![Backend::Cuda, Backend::Cpu]
        );
        assert_eq!(preference_order(&[], &BackendPolicy::default()), vec![Backend::Cpu]);

        let no_trt = BackendPolicy {
            allow_tensorrt: false,
            allow_cuda: true,
        };
        assert_eq!(preference_order(&all, &no_trt), vec![Backend::Cuda, Backend::Cpu]);
    }

    #[test]
    fn test_backend_names_parse() {
        assert_eq!(Backend::from_str("CPU").unwrap(), Backend::Cpu);
        assert_eq!(Backend::from_str("cuda").unwrap(), Backend::Cuda);
        assert_eq!(Backend::from_str("TensorrtExecutionProvider").unwrap(), Backend::TensorRt);
        assert_eq!(Backend::Cpu.to_string(), "CPU");
        assert!(Backend::from_str("TPU").is_err());
    }

    /// Records every request and fails according to a script
    struct ScriptedRuntime {
        available: Vec<Backend>,
        fail_preferred: bool,
        fail_cpu: bool,
        calls: RefCell<Vec<Vec<Backend>>>,
    }

    impl InferenceRuntime for ScriptedRuntime {
        type Session = &'static str;

        fn available_backends(&self) -> Vec<Backend> {
            self.available.clone()
        }

        fn create_session(&self, _: &Path, backends: &[Backend]) -> Result<&'static str> {
            self.calls.borrow_mut().push(backends.to_vec());
            let cpu_only = backends == [Backend::Cpu];
            if (cpu_only && self.fail_cpu) || (!cpu_only && self.fail_preferred) {
                Err(Error::BackendError("init failed".to_string()))
            } else {
                Ok("session")
            }
        }
    }

    fn scripted(fail_preferred: bool, fail_cpu: bool) -> ScriptedRuntime {
        ScriptedRuntime {
            available: vec![Backend::TensorRt, Backend::Cuda, Backend::Cpu],
            fail_preferred,
            fail_cpu,
            calls: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_preferred_list_used_when_it_works() {
        let runtime = scripted(false, false);
        let selection = BackendSelector::new(&runtime, BackendPolicy::default())
            .select(Path::new("m.onnx"))
            .unwrap();

        assert_eq!(selection.backends, vec![Backend::TensorRt, Backend::Cuda, Backend::Cpu]);
        assert_eq!(runtime.calls.borrow().len(), 1);
    }

    #[test]
    fn test_falls_back_to_cpu_once() {
        let runtime = scripted(true, false);
        let selection = BackendSelector::new(&runtime, BackendPolicy::default())
            .select(Path::new("m.onnx"))
            .unwrap();

        assert_eq!(selection.session, "session");
        assert_eq!(selection.backends, vec![Backend::Cpu]);
        assert_eq!(runtime.calls.borrow().len(), 2);
    }

    #[test]
    fn test_cpu_fallback_failure_is_backend_error() {
        let runtime = scripted(true, true);
        let result = BackendSelector::new(&runtime, BackendPolicy::default()).select(Path::new("m.onnx"));

        assert!(matches!(result, Err(Error::BackendError(_))));
        assert_eq!(runtime.calls.borrow().len(), 2);
    }
}
