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

//! Diesel schema for the pipeline tables.

diesel::table! {
    executions (id) {
        id -> Integer,
        name -> Text,
        output_dir -> Text,
        successful -> Bool,
        max_cpus -> Nullable<Integer>,
        max_attempts -> Integer,
        info -> Text,
        status -> Text,
        created_on -> Nullable<Timestamp>,
        started_on -> Nullable<Timestamp>,
        finished_on -> Nullable<Timestamp>,
    }
}

diesel::table! {
    stages (id) {
        id -> Integer,
        execution_id -> Integer,
        name -> Text,
        number -> Nullable<Integer>,
        status -> Text,
        successful -> Bool,
        finished_on -> Nullable<Timestamp>,
    }
}

diesel::table! {
    tasks (id) {
        id -> Integer,
        stage_id -> Integer,
        tags -> Text,
        status -> Text,
        attempt -> Integer,
        cpu_req -> Integer,
        mem_req -> Nullable<Integer>,
        time_req -> Nullable<Integer>,
        must_succeed -> Bool,
        noop -> Bool,
        log_dir -> Nullable<Text>,
        command -> Nullable<Text>,
        profile -> Text,
    }
}

diesel::table! {
    task_files (id) {
        id -> Integer,
        task_id -> Integer,
        name -> Text,
        basename -> Text,
        path -> Text,
        persist -> Bool,
        duplicate_ok -> Bool,
    }
}

diesel::table! {
    stage_edges (id) {
        id -> Integer,
        parent_id -> Integer,
        child_id -> Integer,
    }
}

diesel::table! {
    task_edges (id) {
        id -> Integer,
        parent_id -> Integer,
        child_id -> Integer,
    }
}

diesel::joinable!(stages -> executions (execution_id));
diesel::joinable!(tasks -> stages (stage_id));
diesel::joinable!(task_files -> tasks (task_id));

diesel::allow_tables_to_appear_in_same_query!(
    executions,
    stages,
    tasks,
    task_files,
    stage_edges,
    task_edges,
);
