//! Publish stage: compute client-visible download URLs for every
//! registered artifact and persist the final record.

use tracing::warn;

use super::{persist, PipelineContext, StageParam};
use crate::error::AppError;

pub async fn run(ctx: &PipelineContext, param: &mut StageParam) -> Result<(), AppError> {
    for artifact in &mut param.task.artifacts {
        let local = std::path::Path::new(&artifact.local_path);
        match ctx.paths.task_download_url(local) {
            Some(url) => artifact.download_url = url,
            None => {
                warn!(
                    task_id = %param.task.task_id,
                    path = %artifact.local_path,
                    "artifact outside task root, no download URL"
                );
            }
        }
    }

    if let Some(tts_result) = &param.tts_result {
        if let Some(url) = ctx.paths.task_download_url(tts_result) {
            param.task.speech_download_url = url;
        }
    }

    persist(ctx, &param.task).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing;
    use crate::task::Artifact;

    #[tokio::test]
    async fn artifacts_get_task_relative_urls() {
        let world = testing::world_with(Vec::new(), Vec::new()).await;
        let mut param = testing::param_for(&world, "pub_urls");

        let srt = param.output_dir.join("origin.srt");
        param
            .task
            .push_artifact(Artifact::new("origin.srt", srt.display().to_string()));
        param
            .task
            .push_artifact(Artifact::new("outside", "/etc/hosts"));
        param.tts_result = Some(param.task_dir.join("tts_result.wav"));

        run(&world.ctx, &mut param).await.unwrap();

        assert_eq!(
            param.task.artifacts[0].download_url,
            "tasks/pub_urls/output/origin.srt"
        );
        assert!(param.task.artifacts[1].download_url.is_empty());
        assert_eq!(
            param.task.speech_download_url,
            "tasks/pub_urls/tts_result.wav"
        );
    }
}
