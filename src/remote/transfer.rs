//! Input data transfer
//!
//! Copies the data-preparation outputs (genotype matrix, phenotype vector,
//! SNP positions and optional covariates) into the machine's data directory.
//! The files are opaque here: only their presence is checked.

use super::{shell_path, RemoteLayout, RemoteShell};
use crate::config::{DeploymentTarget, RoleSet};
use crate::error::{LaunchError, LaunchResult, ValidationError};
use std::path::{Path, PathBuf};
use tracing::info;

pub const GENO_FILE: &str = "geno.txt";
pub const PHENO_FILE: &str = "pheno.txt";
pub const POS_FILE: &str = "pos.txt";
pub const COV_FILE: &str = "cov.txt";

/// Local files to transfer to one machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFiles {
    files: Vec<PathBuf>,
}

impl InputFiles {
    /// Collect the files `roles` need from `dir`
    ///
    /// Every machine needs the SNP positions. A data party also needs the
    /// genotype and phenotype files, plus covariates when present.
    pub fn from_dir(dir: &Path, roles: &RoleSet) -> Result<Self, ValidationError> {
        let mut required = vec![POS_FILE];
        let mut optional = Vec::new();
        if roles.contains(crate::config::Role::DataParty) {
            required.extend([GENO_FILE, PHENO_FILE]);
            optional.push(COV_FILE);
        }

        let mut files = Vec::new();
        for name in required {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(ValidationError::MissingInputFile(path));
            }
            files.push(path);
        }
        for name in optional {
            let path = dir.join(name);
            if path.is_file() {
                files.push(path);
            }
        }

        Ok(Self { files })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Copy `inputs` into the data directory of `target`
pub async fn upload(
    shell: &dyn RemoteShell,
    layout: &RemoteLayout,
    target: &DeploymentTarget,
    inputs: &InputFiles,
) -> LaunchResult<usize> {
    let data_dir = layout.data_dir();
    let output = shell
        .execute(target, &format!("mkdir -p {}", shell_path(&data_dir)))
        .await?;
    if !output.success() {
        return Err(LaunchError::Transport {
            target: target.clone(),
            reason: format!("failed to create {}: {}", data_dir, output.failure_reason()),
        });
    }

    for file in inputs.files() {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = format!("{}/{}", data_dir, name);
        shell.copy_to(target, file, &dest).await?;
        info!(%target, file = %file.display(), %dest, "uploaded input file");
    }

    Ok(inputs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use crate::remote::local::LocalShell;
    use std::fs;

    fn write_inputs(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), "0 1 2\n1 2 0\n").unwrap();
        }
    }

    #[test]
    fn test_computing_party_needs_positions_only() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path(), &[POS_FILE]);

        let roles = RoleSet::from_parts(Some(Role::Cp1), false);
        let inputs = InputFiles::from_dir(dir.path(), &roles).unwrap();
        assert_eq!(inputs.files(), &[dir.path().join(POS_FILE)]);
    }

    #[test]
    fn test_data_party_missing_geno() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path(), &[POS_FILE, PHENO_FILE]);

        let roles = RoleSet::from_parts(None, true);
        let err = InputFiles::from_dir(dir.path(), &roles).unwrap_err();
        assert_eq!(err, ValidationError::MissingInputFile(dir.path().join(GENO_FILE)));
    }

    #[test]
    fn test_covariates_optional() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path(), &[POS_FILE, GENO_FILE, PHENO_FILE]);
        let roles = RoleSet::from_parts(None, true);
        assert_eq!(InputFiles::from_dir(dir.path(), &roles).unwrap().len(), 3);

        write_inputs(dir.path(), &[COV_FILE]);
        assert_eq!(InputFiles::from_dir(dir.path(), &roles).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_upload_with_local_shell() {
        let src = tempfile::tempdir().unwrap();
        write_inputs(src.path(), &[POS_FILE, GENO_FILE, PHENO_FILE]);
        let remote = tempfile::tempdir().unwrap();
        let layout = RemoteLayout::new(remote.path().to_str().unwrap(), remote.path().to_str().unwrap());

        let roles = RoleSet::from_parts(Some(Role::Cp2), true);
        let inputs = InputFiles::from_dir(src.path(), &roles).unwrap();
        let target = DeploymentTarget::new("local", "none", "localhost");

        let copied = upload(&LocalShell::new(), &layout, &target, &inputs).await.unwrap();
        assert_eq!(copied, 3);
        for name in [POS_FILE, GENO_FILE, PHENO_FILE] {
            assert!(Path::new(&layout.data_dir()).join(name).is_file());
        }
    }
}
