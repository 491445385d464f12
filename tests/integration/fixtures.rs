/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Shared fixtures for the integration tests: an app over a scratch SQLite
//! database and a small zoo of shell tools.

use std::path::Path;

use sluice::{
    tags, InputMap, OutputMap, OutputSpec, Params, Sluice, Tags, Tool, ToolError,
};

/// Builds an app backed by a file database under `dir` and runs migrations.
pub fn test_app(dir: &Path) -> Sluice {
    sluice::init_test_logging();
    let db_path = dir.join("sluice.db");
    let app = Sluice::new(Some(db_path.to_str().unwrap()), "local", None).unwrap();
    app.initdb().unwrap();
    app
}

/// Echoes its `word` tag to stdout and into its `txt` output file.
pub struct Echo {
    tags: Tags,
}

impl Echo {
    pub fn new(word: &str) -> Box<dyn Tool> {
        Box::new(Self {
            tags: tags! { "word" => word },
        })
    }

    pub fn with_tags(tags: Tags) -> Box<dyn Tool> {
        Box::new(Self { tags })
    }
}

impl Tool for Echo {
    fn name(&self) -> &str {
        "Echo"
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn outputs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::named("txt")]
    }

    fn cmd(
        &self,
        _inputs: &InputMap,
        outputs: &OutputMap,
        params: &Params,
    ) -> Result<String, ToolError> {
        let word = &params["word"];
        Ok(format!(
            "echo {} > {} && echo {}",
            word,
            outputs["txt"].path.display(),
            word
        ))
    }
}

/// Concatenates every `txt` input into its `cat` output file.
pub struct Cat {
    tags: Tags,
}

impl Cat {
    pub fn factory(tags: Tags) -> Box<dyn Tool> {
        Box::new(Self { tags })
    }
}

impl Tool for Cat {
    fn name(&self) -> &str {
        "Cat"
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn inputs(&self) -> Vec<sluice::InputSpec> {
        vec!["txt".into()]
    }

    fn outputs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec::named("cat")]
    }

    fn cmd(
        &self,
        inputs: &InputMap,
        outputs: &OutputMap,
        _params: &Params,
    ) -> Result<String, ToolError> {
        let sources: Vec<String> = inputs["txt"]
            .iter()
            .map(|f| f.path.display().to_string())
            .collect();
        Ok(format!(
            "cat {} > {}",
            sources.join(" "),
            outputs["cat"].path.display()
        ))
    }
}

/// Exits non-zero on the first attempt, zero afterwards, using a marker
/// file passed through the `marker` tag.
pub struct Flaky {
    tags: Tags,
}

impl Flaky {
    pub fn new(marker: &Path) -> Box<dyn Tool> {
        Box::new(Self {
            tags: tags! { "marker" => marker.to_str().unwrap() },
        })
    }
}

impl Tool for Flaky {
    fn name(&self) -> &str {
        "Flaky"
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn cmd(
        &self,
        _inputs: &InputMap,
        _outputs: &OutputMap,
        params: &Params,
    ) -> Result<String, ToolError> {
        let marker = &params["marker"];
        Ok(format!(
            "if [ -e {m} ]; then exit 0; else touch {m}; exit 1; fi",
            m = marker
        ))
    }
}

/// Always exits 1.
pub struct Fail {
    tags: Tags,
}

impl Fail {
    pub fn new(tags: Tags) -> Box<dyn Tool> {
        Box::new(Self { tags })
    }
}

impl Tool for Fail {
    fn name(&self) -> &str {
        "Fail"
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn cmd(
        &self,
        _inputs: &InputMap,
        _outputs: &OutputMap,
        _params: &Params,
    ) -> Result<String, ToolError> {
        Ok("exit 1".to_string())
    }
}

/// Sleeps, then exits 0. Used to observe the CPU budget.
pub struct Sleepy {
    tags: Tags,
    cpu_req: u32,
}

impl Sleepy {
    pub fn new(n: i64, cpu_req: u32) -> Box<dyn Tool> {
        Box::new(Self {
            tags: tags! { "n" => n },
            cpu_req,
        })
    }
}

impl Tool for Sleepy {
    fn name(&self) -> &str {
        "Sleepy"
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn cpu_req(&self) -> u32 {
        self.cpu_req
    }

    fn cmd(
        &self,
        _inputs: &InputMap,
        _outputs: &OutputMap,
        _params: &Params,
    ) -> Result<String, ToolError> {
        Ok("sleep 0.4".to_string())
    }
}

/// A no-op succeeding tool that still forks, used where command content is
/// irrelevant.
pub struct Ok0 {
    tags: Tags,
}

impl Ok0 {
    pub fn factory(tags: Tags) -> Box<dyn Tool> {
        Box::new(Self { tags })
    }
}

impl Tool for Ok0 {
    fn name(&self) -> &str {
        "Ok0"
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn cmd(
        &self,
        _inputs: &InputMap,
        _outputs: &OutputMap,
        _params: &Params,
    ) -> Result<String, ToolError> {
        Ok("true".to_string())
    }
}
